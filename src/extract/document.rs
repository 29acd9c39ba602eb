//! Document-backed extraction (`json` and `xml` units).

use super::{Counters, ExtractError};
use ei_path_parser::{JsonParser, JsonStream, ObjectStream, XmlParser, XmlStream};
use ei_schema::{DocumentUnit, Filter, UnitExtractSpec};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::Sender;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    Json,
    Xml,
}

/// One parser for the whole document, watching the path of every declared unit.
fn open_stream<'r>(
    format: Format,
    units: &BTreeMap<String, UnitExtractSpec>,
    main: &DocumentUnit,
    input: Box<dyn AsyncRead + Unpin + Send + 'r>,
) -> Box<dyn ObjectStream + 'r> {
    let patterns = units
        .iter()
        .map(|(name, unit)| unit.path_pattern(name));
    match format {
        Format::Json => {
            let mut parser = JsonParser::new(main.value_scoped);
            for pattern in patterns {
                debug!("Watching JSON path {pattern}");
                parser.on_path(&pattern);
            }
            Box::new(JsonStream::new(input, parser))
        }
        Format::Xml => {
            let mut parser = XmlParser::new();
            for pattern in patterns {
                debug!("Watching XML path {pattern}");
                parser.on_path(&pattern);
            }
            Box::new(XmlStream::new(input, parser))
        }
    }
}

/// Send every matched object that passes `filter`.
pub(crate) async fn export<'r>(
    format: Format,
    units: &BTreeMap<String, UnitExtractSpec>,
    main: &DocumentUnit,
    aliases: &BTreeMap<String, String>,
    input: Box<dyn AsyncRead + Unpin + Send + 'r>,
    filter: &Filter,
    tx: &Sender<Value>,
) -> Result<Counters, ExtractError> {
    let filter = filter.translate(aliases);
    let mut stream = open_stream(format, units, main, input);
    let mut counters = Counters::default();

    while let Some(object) = stream.next_object().await? {
        counters.seen += 1;
        if !filter.admits(&object) {
            continue;
        }
        counters.passed += 1;
        tx.send(object).await.map_err(|_| ExtractError::Closed)?;
    }
    Ok(counters)
}
