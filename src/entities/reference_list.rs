//! Loads the entity reference list: a CSV file, possibly gzipped, read from
//! disk or downloaded.

use crate::entities::error::EntityListError;
use crate::types::entity::{Entity, EntityKind};
use crate::utils::decode_text;
use async_compression::tokio::bufread::GzipDecoder;
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use polars::prelude::*;
use reqwest::Client;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySource {
    Path(PathBuf),
    Url(String),
}

impl EntitySource {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            EntitySource::Url(raw.to_string())
        } else {
            EntitySource::Path(PathBuf::from(raw))
        }
    }
}

/// Loads entities of `kind` from `source`. Ids are read from `id_column`,
/// or the kind's default column, normalized, and de-duplicated keeping
/// first-seen order.
pub async fn load_entities(
    source: &EntitySource,
    kind: EntityKind,
    id_column: Option<&str>,
) -> Result<Vec<Entity>, EntityListError> {
    let raw = match source {
        EntitySource::Path(path) => tokio::fs::read(path)
            .await
            .map_err(|e| EntityListError::Read(path.clone(), e))?,
        EntitySource::Url(url) => download(url).await?,
    };
    let bytes = if raw.starts_with(&GZIP_MAGIC) {
        gunzip(&raw).await?
    } else {
        raw
    };
    let column = id_column
        .unwrap_or_else(|| kind.default_id_column())
        .to_string();
    let entities =
        tokio::task::spawn_blocking(move || parse_entities(&bytes, kind, &column)).await??;
    info!("Loaded {} {:?} entities from {:?}", entities.len(), kind, source);
    Ok(entities)
}

async fn download(url: &str) -> Result<Vec<u8>, EntityListError> {
    info!("Downloading entity list from {}", url);
    let response = Client::new()
        .get(url)
        .send()
        .await
        .map_err(|e| EntityListError::NetworkRequest(url.to_string(), e))?;
    let response = match response.error_for_status() {
        Ok(resp) => resp,
        Err(e) => {
            warn!("HTTP error for {}: {:?}", url, e);
            return Err(match e.status() {
                Some(status) => EntityListError::HttpStatus {
                    url: url.to_string(),
                    status,
                    source: e,
                },
                None => EntityListError::NetworkRequest(url.to_string(), e),
            });
        }
    };
    let stream = response
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let mut reader = StreamReader::new(stream);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

async fn gunzip(compressed: &[u8]) -> Result<Vec<u8>, EntityListError> {
    let mut decoder = GzipDecoder::new(BufReader::new(compressed));
    let mut out = Vec::with_capacity(compressed.len() * 4);
    decoder.read_to_end(&mut out).await?;
    debug!("Decompressed entity list: {} -> {} bytes", compressed.len(), out.len());
    Ok(out)
}

/// Parses CSV bytes into entities. Blocking.
///
/// Every column is read as text so that codes keep their leading zeros. The
/// separator is `;` when the header uses it, `,` otherwise.
pub fn parse_entities(
    bytes: &[u8],
    kind: EntityKind,
    id_column: &str,
) -> Result<Vec<Entity>, EntityListError> {
    let text = decode_text(bytes).into_owned();
    let header = text.lines().next().unwrap_or_default();
    let separator = if header.contains(';') && !header.contains(',') {
        b';'
    } else {
        b','
    };
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|options| options.with_separator(separator))
        .into_reader_with_file_handle(Cursor::new(text.into_bytes()))
        .finish()
        .map_err(EntityListError::CsvParse)?;

    let column = df
        .column(id_column)
        .map_err(|_| EntityListError::MissingColumn {
            column: id_column.to_string(),
            available: df
                .get_column_names()
                .iter()
                .map(|name| name.to_string())
                .collect(),
        })?;
    let ids = column.str().map_err(EntityListError::CsvParse)?;

    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    let mut skipped = 0usize;
    for raw in ids.into_iter() {
        let Some(id) = raw.and_then(|r| kind.normalize_id(r)) else {
            skipped += 1;
            continue;
        };
        if seen.insert(id.clone()) {
            entities.push(Entity {
                entity_id: id,
                entity_kind: kind,
            });
        }
    }
    if skipped > 0 {
        debug!("Skipped {} blank ids in column '{}'", skipped, id_column);
    }
    Ok(entities)
}
