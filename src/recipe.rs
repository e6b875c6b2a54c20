//! Recipe sources
//!
//! The voice loop treats a recipe as an opaque block of text. Sources only
//! decide where that text comes from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// Supplies recipe text
pub trait RecipeSource: Send + Sync {
    /// Fetch the recipe as plain text or markdown
    ///
    /// # Errors
    ///
    /// Returns error if the recipe cannot be read or is empty
    fn fetch(&self) -> Result<String>;
}

/// Recipe stored on disk
///
/// `.yaml` / `.yml` files carry the text under a top-level `recipe` key;
/// anything else is read verbatim.
#[derive(Debug, Clone)]
pub struct FileRecipe {
    path: PathBuf,
}

#[derive(Deserialize)]
struct RecipeDocument {
    recipe: String,
}

impl FileRecipe {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecipeSource for FileRecipe {
    fn fetch(&self) -> Result<String> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Recipe(format!("failed to read {}: {e}", self.path.display()))
        })?;

        let is_yaml = matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let text = if is_yaml {
            let doc: RecipeDocument = serde_yaml::from_str(&content)?;
            doc.recipe
        } else {
            content
        };

        tracing::debug!(path = %self.path.display(), chars = text.len(), "recipe loaded");
        non_empty(text)
    }
}

/// Recipe text entered by the user
#[derive(Debug, Clone)]
pub struct InlineRecipe(String);

impl InlineRecipe {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

impl RecipeSource for InlineRecipe {
    fn fetch(&self) -> Result<String> {
        non_empty(self.0.clone())
    }
}

const NOTION_API_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Nested blocks deeper than this are not fetched
const MAX_BLOCK_DEPTH: usize = 8;

/// One page of a block's children
#[derive(Debug, Deserialize)]
struct BlockList {
    results: Vec<Block>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

/// A Notion block; its payload sits under a key named after its type
#[derive(Debug, Deserialize)]
struct Block {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    has_children: bool,
    #[serde(flatten)]
    payload: HashMap<String, Value>,
}

impl Block {
    fn plain_text(&self) -> String {
        self.payload
            .get(&self.kind)
            .and_then(|p| p.get("rich_text"))
            .and_then(Value::as_array)
            .map(|spans| {
                spans
                    .iter()
                    .filter_map(|span| span.get("plain_text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_checked(&self) -> bool {
        self.payload
            .get(&self.kind)
            .and_then(|p| p.get("checked"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Recipe kept as a Notion page
///
/// The page's blocks are fetched recursively and flattened to markdown.
pub struct NotionRecipe {
    client: reqwest::blocking::Client,
    token: String,
    page_id: String,
    base_url: String,
}

impl NotionRecipe {
    /// # Errors
    ///
    /// Returns error if the token or page id is empty
    pub fn new(token: impl Into<String>, page_id: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let page_id = page_id.into();
        if token.is_empty() {
            return Err(Error::Config("Notion API token required".to_string()));
        }
        if page_id.trim().is_empty() {
            return Err(Error::InvalidInput("Notion page id is empty".to_string()));
        }

        Ok(Self {
            client: reqwest::blocking::Client::new(),
            token,
            page_id: page_id.trim().to_string(),
            base_url: NOTION_API_URL.to_string(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn children(&self, block_id: &str) -> Result<Vec<Block>> {
        let url = format!("{}/blocks/{block_id}/children", self.base_url);
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .header("Notion-Version", NOTION_VERSION)
                .query(&[("page_size", "100")]);
            if let Some(cursor) = &cursor {
                request = request.query(&[("start_cursor", cursor.as_str())]);
            }

            let response = request
                .send()
                .inspect_err(|e| tracing::error!(error = %e, "Notion request failed"))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(Error::Recipe(format!("Notion API error {status}: {body}")));
            }

            let page: BlockList = response.json()?;
            blocks.extend(page.results);
            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => return Ok(blocks),
            }
        }
    }
}

impl RecipeSource for NotionRecipe {
    fn fetch(&self) -> Result<String> {
        let top = self.children(&self.page_id)?;
        let mut text = String::new();
        render_blocks(&top, 0, &mut |id| self.children(id), &mut text)?;

        tracing::debug!(page = %self.page_id, chars = text.len(), "recipe page loaded");
        non_empty(text)
    }
}

/// Flatten blocks to markdown lines, fetching nested children on demand
fn render_blocks(
    blocks: &[Block],
    depth: usize,
    children: &mut dyn FnMut(&str) -> Result<Vec<Block>>,
    out: &mut String,
) -> Result<()> {
    let indent = "  ".repeat(depth);
    let mut number = 0;

    for block in blocks {
        number = if block.kind == "numbered_list_item" { number + 1 } else { 0 };

        let text = block.plain_text();
        let line = match block.kind.as_str() {
            "heading_1" => format!("# {text}"),
            "heading_2" => format!("## {text}"),
            "heading_3" => format!("### {text}"),
            "bulleted_list_item" => format!("- {text}"),
            "numbered_list_item" => format!("{number}. {text}"),
            "to_do" if block.is_checked() => format!("- [x] {text}"),
            "to_do" => format!("- [ ] {text}"),
            "quote" => format!("> {text}"),
            _ => text,
        };
        if !line.trim().is_empty() {
            out.push_str(&indent);
            out.push_str(&line);
            out.push('\n');
        }

        if block.has_children && depth + 1 < MAX_BLOCK_DEPTH {
            let nested = children(&block.id)?;
            render_blocks(&nested, depth + 1, children, out)?;
        }
    }
    Ok(())
}

fn non_empty(text: String) -> Result<String> {
    if text.trim().is_empty() {
        return Err(Error::Recipe("recipe is empty".to_string()));
    }
    Ok(text)
}
