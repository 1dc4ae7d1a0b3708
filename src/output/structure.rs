//! Map file generation
//!
//! Renders the site map export as the JSON map file and the human-readable
//! structure listing, and writes both through the content sink.

use crate::output::sink::ContentSink;
use crate::sitemap::{SiteMapExport, TreeNode};
use crate::url::ResourceKind;
use crate::AtlasError;
use std::fmt;

/// The structure listing of a site map
///
/// Layout: header, page list (`url -> local path`), assets grouped by kind,
/// failed and skipped items with their reasons, then the page tree.
#[derive(Debug, Clone, Copy)]
pub struct StructureListing<'a>(pub &'a SiteMapExport);

impl fmt::Display for StructureListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let export = self.0;
        writeln!(f, "Website Structure for: {}", export.seed)?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f)?;

        writeln!(f, "Pages:")?;
        for entry in export.pages().filter(|e| e.status.is_success()) {
            let path = entry.local_path.as_deref().unwrap_or("-");
            writeln!(f, "  {} -> {}", entry.url, path)?;
        }

        writeln!(f)?;
        writeln!(f, "Assets:")?;
        for kind in ResourceKind::asset_kinds() {
            let paths: Vec<&str> = export
                .assets()
                .filter(|e| e.kind == kind && e.status.is_success())
                .filter_map(|e| e.local_path.as_deref())
                .collect();
            if paths.is_empty() {
                continue;
            }
            writeln!(f)?;
            writeln!(f, "  {}:", kind.as_str().to_uppercase())?;
            for path in paths {
                writeln!(f, "    {}", path)?;
            }
        }

        let mut problems = export
            .manifest
            .iter()
            .filter(|e| !e.status.is_success())
            .peekable();
        if problems.peek().is_some() {
            writeln!(f)?;
            writeln!(f, "Not Downloaded:")?;
            for entry in problems {
                writeln!(f, "  {} [{}] {}", entry.url, entry.kind, entry.status)?;
            }
        }

        if let Some(root) = &export.root {
            writeln!(f)?;
            writeln!(f, "Tree:")?;
            write_tree(f, root, 1)?;
        }
        Ok(())
    }
}

fn write_tree(f: &mut fmt::Formatter<'_>, node: &TreeNode, indent: usize) -> fmt::Result {
    writeln!(
        f,
        "{}{} [{}]",
        "  ".repeat(indent),
        node.entry.url,
        node.entry.kind
    )?;
    for child in &node.children {
        write_tree(f, child, indent + 1)?;
    }
    Ok(())
}

/// Renders the structure listing to a string
pub fn render_structure(export: &SiteMapExport) -> String {
    StructureListing(export).to_string()
}

/// Writes the JSON map and the structure listing through the sink
pub fn write_site_map(
    sink: &dyn ContentSink,
    export: &SiteMapExport,
    map_file: &str,
    structure_file: &str,
) -> Result<(), AtlasError> {
    let json = export.to_json()?;
    sink.store(map_file, json.as_bytes())?;
    tracing::info!("Saved website map to {}", map_file);

    let structure = render_structure(export);
    sink.store(structure_file, structure.as_bytes())?;
    tracing::info!("Saved readable structure to {}", structure_file);

    Ok(())
}
