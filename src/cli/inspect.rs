//! `inspect` command: describe a document or an output file.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::document::{self, PdnDocument};
use crate::raster::{TgaHeader, read_header, tga::HEADER_LEN};

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Summary {
    Document(DocumentSummary),
    Tga(TgaSummary),
}

#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_with: Option<String>,
    pub layers: Vec<LayerSummary>,
}

#[derive(Debug, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub opacity: u8,
    pub blend_mode: &'static str,
    pub visible: bool,
}

#[derive(Debug, Serialize)]
pub struct TgaSummary {
    pub width: u16,
    pub height: u16,
    pub image_type: u8,
    pub pixel_depth: u8,
    pub top_left_origin: bool,
}

impl From<&PdnDocument> for DocumentSummary {
    fn from(doc: &PdnDocument) -> Self {
        Self {
            width: doc.width,
            height: doc.height,
            saved_with: doc
                .header
                .as_ref()
                .and_then(|h| h.saved_with_version.clone()),
            layers: doc
                .layers
                .iter()
                .map(|layer| LayerSummary {
                    name: layer.name.clone(),
                    x: layer.x,
                    y: layer.y,
                    width: layer.width,
                    height: layer.height,
                    opacity: layer.opacity,
                    blend_mode: layer.blend_mode.name(),
                    visible: layer.visible,
                })
                .collect(),
        }
    }
}

impl From<TgaHeader> for TgaSummary {
    fn from(header: TgaHeader) -> Self {
        Self {
            width: header.width,
            height: header.height,
            image_type: header.image_type,
            pixel_depth: header.pixel_depth,
            top_left_origin: header.top_left_origin(),
        }
    }
}

/// Summarize `path` by extension.
pub fn summarize(path: &Path) -> Result<Summary> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("pdn") => {
            let doc = document::open(path)
                .with_context(|| format!("Failed to decode {}", path.display()))?;
            Ok(Summary::Document(DocumentSummary::from(&doc)))
        }
        Some("tga") => {
            let mut header = [0u8; HEADER_LEN];
            fs::File::open(path)
                .and_then(|mut f| f.read_exact(&mut header))
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(Summary::Tga(read_header(&header)?.into()))
        }
        _ => bail!("cannot inspect {}: expected .pdn or .tga", path.display()),
    }
}

/// Print a summary of `path` to stdout.
pub fn run_inspect(path: &Path, json: bool) -> Result<()> {
    let summary = summarize(path)?;
    let mut out = std::io::stdout().lock();

    if json {
        serde_json::to_writer_pretty(&mut out, &summary)?;
        writeln!(out)?;
    } else {
        write_text(&mut out, &summary)?;
    }
    Ok(())
}

fn write_text<W: Write>(out: &mut W, summary: &Summary) -> std::io::Result<()> {
    match summary {
        Summary::Document(doc) => {
            writeln!(out, "document {}x{}, {} layer(s)", doc.width, doc.height, doc.layers.len())?;
            if let Some(saved_with) = &doc.saved_with {
                writeln!(out, "saved with {saved_with}")?;
            }
            for (i, layer) in doc.layers.iter().enumerate() {
                writeln!(
                    out,
                    "  #{i} {:?} {}x{} at ({}, {}), opacity {}, {}{}",
                    layer.name,
                    layer.width,
                    layer.height,
                    layer.x,
                    layer.y,
                    layer.opacity,
                    layer.blend_mode,
                    if layer.visible { "" } else { ", hidden" },
                )?;
            }
        }
        Summary::Tga(tga) => {
            writeln!(
                out,
                "tga {}x{}, type {}, {} bpp, {} origin",
                tga.width,
                tga.height,
                tga.image_type,
                tga.pixel_depth,
                if tga.top_left_origin { "top-left" } else { "bottom-left" },
            )?;
        }
    }
    Ok(())
}
