//! CSV rows from a local file or an HTTP(S) URL.
//!
//! The first non-blank line is the header; every later line becomes one
//! item whose document maps header names to field values. Rows are read
//! once: all pages of a listing share a single pass over the source.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;
use url::Url;

use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpMethod, HttpRequest, HttpTransport};
use crate::repo::{Item, Page, RepoError, Repository};

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// How a row's id is derived.
#[derive(Debug, Clone)]
pub enum RowId {
    /// The running row index, counted from zero across the whole listing.
    Index,
    /// The row's value in one column.
    Column(String),
    /// The row's values in several columns, joined in tuple notation.
    Columns(Vec<String>),
}

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Url(String),
}

/// Rows of a CSV document.
#[derive(Clone)]
pub struct Rows {
    inner: Arc<RowsInner>,
}

struct RowsInner {
    transport: Arc<dyn HttpTransport>,
    source: Source,
    row_id: RowId,
    page_size: usize,
    delimiter: char,
}

impl Rows {
    /// Create a connector for `path_or_url` with a default HTTP client.
    ///
    /// Anything that parses as an `http` or `https` URL is fetched over
    /// the network; everything else is treated as a filesystem path.
    pub fn new(path_or_url: &str) -> Result<Self, RepoError> {
        let transport = ReqwestTransport::with_timeout(StdDuration::from_secs(30))
            .map_err(|e| RepoError::init(e.to_string()))?;
        Ok(Self::new_with_transport(path_or_url, Arc::new(transport)))
    }

    pub fn new_with_transport(path_or_url: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            inner: Arc::new(RowsInner {
                transport,
                source: classify(path_or_url),
                row_id: RowId::Index,
                page_size: DEFAULT_PAGE_SIZE,
                delimiter: ',',
            }),
        }
    }

    /// Derive row ids with `row_id` instead of the running index.
    #[must_use]
    pub fn with_row_id(self, row_id: RowId) -> Self {
        self.rebuild(|inner| inner.row_id = row_id)
    }

    #[must_use]
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.rebuild(|inner| inner.page_size = page_size.max(1))
    }

    /// Split fields on `delimiter` instead of a comma.
    #[must_use]
    pub fn with_delimiter(self, delimiter: char) -> Self {
        self.rebuild(|inner| inner.delimiter = delimiter)
    }

    fn rebuild(self, mutate: impl FnOnce(&mut RowsInner)) -> Self {
        let mut inner = RowsInner {
            transport: Arc::clone(&self.inner.transport),
            source: self.inner.source.clone(),
            row_id: self.inner.row_id.clone(),
            page_size: self.inner.page_size,
            delimiter: self.inner.delimiter,
        };
        mutate(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }
}

#[async_trait]
impl Repository for Rows {
    async fn list_page(&self) -> Result<Page, RepoError> {
        let stream = open_stream(&self.inner).await?;
        rows_page(Arc::clone(&self.inner), Arc::new(Mutex::new(stream)), 0).await
    }

    /// Scan the listing for `id`. Costs a full pass in the worst case.
    async fn get(&self, id: &str) -> Result<Item, RepoError> {
        let mut pages = self.list_pages();
        while let Some(page) = pages.try_next().await? {
            for item in page.items() {
                if item.id() == id {
                    return Ok(item.clone());
                }
            }
        }
        Err(RepoError::not_found(id))
    }
}

fn classify(path_or_url: &str) -> Source {
    match Url::parse(path_or_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Source::Url(path_or_url.to_string()),
        _ => Source::File(PathBuf::from(path_or_url)),
    }
}

enum LineStream {
    File(Lines<BufReader<File>>),
    Buffered(std::vec::IntoIter<String>),
}

impl LineStream {
    async fn next_line(&mut self) -> Result<Option<String>, RepoError> {
        match self {
            LineStream::File(lines) => lines
                .next_line()
                .await
                .map_err(|e| RepoError::api(format!("CSV read failed: {e}"))),
            LineStream::Buffered(lines) => Ok(lines.next()),
        }
    }
}

/// An advancing reader over the source, past the header row.
struct CsvStream {
    lines: LineStream,
    header: Vec<String>,
    delimiter: char,
}

impl CsvStream {
    /// The next non-blank data row, keyed by the header.
    ///
    /// Short rows are null-filled; fields past the header are dropped.
    async fn next_row(&mut self) -> Result<Option<Map<String, Value>>, RepoError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.is_empty() {
                continue;
            }
            let fields = split_fields(&line, self.delimiter);
            let mut row = Map::new();
            for (i, name) in self.header.iter().enumerate() {
                let value = match fields.get(i) {
                    Some(field) => Value::String(field.clone()),
                    None => Value::Null,
                };
                row.insert(name.clone(), value);
            }
            return Ok(Some(row));
        }
    }
}

async fn open_stream(inner: &RowsInner) -> Result<CsvStream, RepoError> {
    let mut lines = match &inner.source {
        Source::File(path) => {
            let file = File::open(path)
                .await
                .map_err(|e| RepoError::init(format!("cannot open {}: {e}", path.display())))?;
            LineStream::File(BufReader::new(file).lines())
        }
        Source::Url(url) => {
            let response = inner.transport.send(fetch_request(url)).await?;
            if !(200..300).contains(&response.status) {
                return Err(RepoError::upstream(
                    response.status,
                    String::from_utf8_lossy(&response.body),
                ));
            }
            let text = String::from_utf8(response.body)
                .map_err(|_| RepoError::api("CSV body is not valid UTF-8"))?;
            let buffered: Vec<String> = text.lines().map(str::to_string).collect();
            LineStream::Buffered(buffered.into_iter())
        }
    };

    let header = loop {
        match lines.next_line().await? {
            Some(line) if line.is_empty() => continue,
            Some(line) => break split_fields(&line, inner.delimiter),
            None => break Vec::new(),
        }
    };

    Ok(CsvStream {
        lines,
        header,
        delimiter: inner.delimiter,
    })
}

/// Drain up to one page of rows from the shared stream.
///
/// A continuation is produced whenever the page came back full, so a
/// source that ends exactly on a page boundary yields one final empty
/// terminal page.
fn rows_page(
    inner: Arc<RowsInner>,
    stream: Arc<Mutex<CsvStream>>,
    index: usize,
) -> BoxFuture<'static, Result<Page, RepoError>> {
    Box::pin(async move {
        let mut items = Vec::new();
        let mut index = index;
        {
            let mut stream = stream.lock().await;
            while items.len() < inner.page_size {
                let Some(row) = stream.next_row().await? else {
                    break;
                };
                let id = row_identifier(&inner.row_id, &row, index)?;
                items.push(Item::new(id, Value::Object(row)));
                index += 1;
            }
        }

        if items.len() == inner.page_size {
            let inner = Arc::clone(&inner);
            Ok(Page::from_fn(items, move || {
                rows_page(Arc::clone(&inner), Arc::clone(&stream), index)
            }))
        } else {
            Ok(Page::new(items))
        }
    })
}

fn row_identifier(
    row_id: &RowId,
    row: &Map<String, Value>,
    index: usize,
) -> Result<String, RepoError> {
    match row_id {
        RowId::Index => Ok(index.to_string()),
        RowId::Column(name) => column_value(row, name, index),
        RowId::Columns(names) => {
            let mut parts = Vec::with_capacity(names.len());
            for name in names {
                parts.push(column_value(row, name, index)?);
            }
            Ok(tuple_id(&parts))
        }
    }
}

fn column_value(row: &Map<String, Value>, name: &str, index: usize) -> Result<String, RepoError> {
    match row.get(name) {
        Some(Value::String(value)) => Ok(value.clone()),
        _ => Err(RepoError::invalid_request(format!(
            "row {index} has no value for id column {name}"
        ))),
    }
}

/// Join composite id parts the way a tuple prints, `('a', 'b')`.
fn tuple_id(parts: &[String]) -> String {
    match parts {
        [only] => format!("('{only}',)"),
        _ => {
            let quoted: Vec<String> = parts.iter().map(|part| format!("'{part}'")).collect();
            format!("({})", quoted.join(", "))
        }
    }
}

/// Split one line on `delimiter`, honoring double-quoted fields.
fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            fields.push(clean_field(&line[start..i]));
            start = i + c.len_utf8();
        }
    }
    fields.push(clean_field(&line[start..]));
    fields
}

fn clean_field(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

fn fetch_request(url: &str) -> HttpRequest {
    HttpRequest {
        method: HttpMethod::Get,
        url: url.to_string(),
        headers: vec![
            ("Accept".to_string(), "text/csv".to_string()),
            ("User-Agent".to_string(), "skimmer".to_string()),
        ],
        body: Vec::new(),
    }
}
