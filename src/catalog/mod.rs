// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 tagdex contributors

//! The image catalog
//!
//! [`Catalog`] is the authoritative in-memory store of every image and its
//! tags for one loaded directory. All tag mutations go through it: each
//! operation snapshots the full tag state for undo, applies its change to
//! the images in scope, and persists affected caption sidecars as it goes.
//! A failed sidecar write never aborts the rest of a batch; it is logged
//! and reported back to the caller.
//!
//! The catalog is single-threaded and synchronous. Callers must serialize
//! access; nothing here suspends or blocks beyond inline file I/O.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ExportConfig;
use crate::error::{Result, TagdexError};
use crate::filter::{matches, FilterContext, FilterNode, Tokenizer};
use crate::history::{HistoryItem, HistoryStack};
use crate::image::{
    caption_sidecar_path, meta_sidecar_path, Image, ImageMeta, Marking, Rect, META_VERSION,
};
use crate::target_dimension::TargetDimensionCache;

/// Which images a batch operation applies to
#[derive(Clone, Copy)]
pub enum Scope<'a> {
    All,
    /// Images matching the current filter; `None` means no filter is active
    /// and every image matches
    Filtered(Option<&'a FilterNode>),
    /// An externally supplied selection, keyed by image path
    Selected(&'a HashSet<PathBuf>),
}

/// Asks the user to confirm applying a history entry
pub trait ConfirmationPrompt {
    fn confirm(&self, title: &str, question: &str) -> bool;
}

/// Prompt that confirms everything, for non-interactive callers
pub struct AlwaysConfirm;

impl ConfirmationPrompt for AlwaysConfirm {
    fn confirm(&self, _title: &str, _question: &str) -> bool {
        true
    }
}

/// Outcome of a mutating batch operation
#[derive(Debug, Default)]
pub struct ChangeReport {
    /// Indices of images whose tag list changed, in catalog order
    pub changed_indices: Vec<usize>,
    /// Tags removed by cleanup operations
    pub removed_tag_count: usize,
    /// Images whose sidecar write failed; their in-memory state is still
    /// mutated and diverges from disk until rewritten
    pub failed_writes: Vec<PathBuf>,
}

impl ChangeReport {
    pub fn changed_count(&self) -> usize {
        self.changed_indices.len()
    }

    /// The minimal contiguous index range covering all changes
    pub fn changed_range(&self) -> Option<(usize, usize)> {
        match (self.changed_indices.first(), self.changed_indices.last()) {
            (Some(&first), Some(&last)) => Some((first, last)),
            _ => None,
        }
    }
}

fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}

/// Anchor a pattern so it must match a whole tag
fn full_match_regex(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{})$", pattern))?)
}

fn write_caption_file(image: &Image, separator: &str) -> std::io::Result<()> {
    std::fs::write(caption_sidecar_path(&image.path), image.caption(separator))
}

/// Persist one image's tags, recording rather than propagating a failure
fn persist_tags(image: &Image, separator: &str, report: &mut ChangeReport) {
    if let Err(e) = write_caption_file(image, separator) {
        tracing::error!("Failed to save tags for {:?}: {}", image.path, e);
        report.failed_writes.push(image.path.clone());
    }
}

fn write_meta_file(image: &Image) -> Result<()> {
    let meta_path = meta_sidecar_path(&image.path);
    let has_content =
        image.rating != 0.0 || image.crop.is_some() || !image.markings.is_empty();
    if !meta_path.exists() && !has_content {
        return Ok(());
    }
    let meta = ImageMeta::from_image(image);
    std::fs::write(&meta_path, serde_json::to_string(&meta)?)?;
    Ok(())
}

/// Callback invoked with the contiguous index range of changed images
pub type TagsChangedCallback = Box<dyn FnMut(usize, usize)>;

/// Ordered collection of images with undo history and tag persistence
pub struct Catalog {
    images: Vec<Image>,
    undo_stack: HistoryStack,
    redo_stack: Vec<HistoryItem>,
    separator: String,
    targets: TargetDimensionCache,
    tokenizer: Option<Box<dyn Tokenizer>>,
    on_tags_changed: Option<TagsChangedCallback>,
}

impl Catalog {
    /// Create an empty catalog using the given effective tag separator
    pub fn new(separator: impl Into<String>, export: &ExportConfig) -> Self {
        Self {
            images: Vec::new(),
            undo_stack: HistoryStack::default(),
            redo_stack: Vec::new(),
            separator: separator.into(),
            targets: TargetDimensionCache::new(export),
            tokenizer: None,
            on_tags_changed: None,
        }
    }

    /// Supply the tokenizer used by `tokens` filter predicates
    pub fn set_tokenizer(&mut self, tokenizer: Box<dyn Tokenizer>) {
        self.tokenizer = Some(tokenizer);
    }

    /// Register the observer notified with each changed index range
    pub fn set_tags_changed_callback(&mut self, callback: TagsChangedCallback) {
        self.on_tags_changed = Some(callback);
    }

    /// Replace the export configuration, invalidating every cached target
    /// dimension
    pub fn set_export_config(&mut self, export: &ExportConfig) {
        self.targets.reconfigure(export);
        for image in &mut self.images {
            image.target_dimension = None;
        }
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn image(&self, index: usize) -> Option<&Image> {
        self.images.get(index)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// How often each distinct tag occurs across the whole catalog
    pub fn tag_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for image in &self.images {
            for tag in &image.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Replace the catalog contents with a recursive scan of a directory.
    ///
    /// Files are partitioned into images (by extension) and sidecars.
    /// Unreadable images are still cataloged with unknown dimensions, and
    /// broken sidecars leave the affected fields empty; neither stops the
    /// scan. Clears the undo and redo history.
    pub fn load_directory(&mut self, directory: &Path, image_suffixes: &[String]) -> Result<()> {
        if !directory.is_dir() {
            return Err(TagdexError::Directory(format!(
                "{} is not a directory",
                directory.display()
            )));
        }
        self.images.clear();
        self.undo_stack.clear();
        self.redo_stack.clear();
        info!("Scanning {}", directory.display());

        let mut image_paths = Vec::new();
        let mut text_paths = HashSet::new();
        let mut json_paths = HashSet::new();
        for entry in WalkDir::new(directory) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("txt") => {
                    text_paths.insert(path);
                }
                Some("json") => {
                    json_paths.insert(path);
                }
                Some(ext) => {
                    let suffix = format!(".{}", ext.to_lowercase());
                    if image_suffixes.contains(&suffix) {
                        image_paths.push(path);
                    }
                }
                None => {}
            }
        }

        for path in image_paths {
            let dimensions = match image::image_dimensions(&path) {
                Ok(dimensions) => Some(dimensions),
                Err(e) => {
                    warn!("Failed to get dimensions for {}: {}", path.display(), e);
                    None
                }
            };
            let mut image = Image::new(path, dimensions);
            let caption_path = caption_sidecar_path(&image.path);
            if text_paths.contains(&caption_path) {
                match std::fs::read(&caption_path) {
                    Ok(bytes) => {
                        let caption = String::from_utf8_lossy(&bytes);
                        if !caption.is_empty() {
                            image.tags = caption
                                .split(self.separator.as_str())
                                .map(str::to_string)
                                .collect();
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read {}: {}", caption_path.display(), e);
                    }
                }
            }
            let meta_path = meta_sidecar_path(&image.path);
            if json_paths.contains(&meta_path) {
                match std::fs::read_to_string(&meta_path)
                    .map_err(TagdexError::from)
                    .and_then(|content| Ok(serde_json::from_str::<ImageMeta>(&content)?))
                {
                    Ok(meta) if meta.version == META_VERSION => meta.apply_to(&mut image),
                    Ok(meta) => {
                        warn!(
                            "Unsupported version {} in {}",
                            meta.version,
                            meta_path.display()
                        );
                    }
                    Err(e) => {
                        warn!("Invalid metadata in {}: {}", meta_path.display(), e);
                    }
                }
            }
            self.images.push(image);
        }
        self.images.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Cataloged {} images", self.images.len());
        Ok(())
    }

    fn snapshot_tags(&self) -> Vec<Vec<String>> {
        self.images.iter().map(|image| image.tags.clone()).collect()
    }

    /// Capture the current tag state of every image on the undo stack.
    ///
    /// Called by every mutating operation before it touches anything, even
    /// when the operation ends up changing nothing. Clears the redo stack.
    pub fn add_to_undo_stack(&mut self, action_name: &str, needs_confirmation: bool) {
        let item = HistoryItem {
            action_name: action_name.to_string(),
            tags: self.snapshot_tags(),
            needs_confirmation,
        };
        self.undo_stack.push(item);
        self.redo_stack.clear();
    }

    /// Serialize an image's tags to its caption sidecar
    pub fn write_image_tags_to_disk(&self, image: &Image) -> Result<()> {
        write_caption_file(image, &self.separator)?;
        Ok(())
    }

    /// The export dimensions for an image, computed and cached on first use.
    /// Starts from the crop rectangle when one is set.
    pub fn target_dimension(&mut self, index: usize) -> Option<(u32, u32)> {
        let image = self.images.get(index)?;
        if let Some(cached) = image.target_dimension {
            return Some(cached);
        }
        let (width, height) = image.source_dimensions()?;
        let result = self.targets.get(width, height);
        self.images[index].target_dimension = Some(result);
        Some(result)
    }

    /// Whether the image at `index` falls inside a scope
    pub fn image_in_scope(&self, index: usize, scope: Scope) -> bool {
        match scope {
            Scope::All => true,
            Scope::Filtered(None) => true,
            Scope::Filtered(Some(filter)) => {
                let ctx = FilterContext {
                    separator: &self.separator,
                    tokenizer: self.tokenizer.as_deref(),
                    targets: &self.targets,
                };
                matches(filter, &self.images[index], &ctx)
            }
            Scope::Selected(selection) => selection.contains(&self.images[index].path),
        }
    }

    fn emit_changed(&mut self, report: &ChangeReport) {
        if let Some((first, last)) = report.changed_range() {
            if let Some(callback) = self.on_tags_changed.as_mut() {
                callback(first, last);
            }
        }
    }

    /// Count occurrences of a text in all in-scope captions, either as
    /// whole-tag matches or anywhere in the joined caption
    pub fn get_text_match_count(
        &self,
        text: &str,
        scope: Scope,
        whole_tags_only: bool,
        use_regex: bool,
    ) -> Result<usize> {
        let regex = if use_regex {
            Some(if whole_tags_only {
                full_match_regex(text)?
            } else {
                Regex::new(text)?
            })
        } else {
            None
        };
        let mut match_count = 0;
        for (index, image) in self.images.iter().enumerate() {
            if !self.image_in_scope(index, scope) {
                continue;
            }
            match_count += match (&regex, whole_tags_only) {
                (Some(regex), true) => {
                    image.tags.iter().filter(|tag| regex.is_match(tag)).count()
                }
                (Some(regex), false) => {
                    regex.find_iter(&image.caption(&self.separator)).count()
                }
                (None, true) => image.tags.iter().filter(|tag| *tag == text).count(),
                (None, false) => image.caption(&self.separator).matches(text).count(),
            };
        }
        Ok(match_count)
    }

    /// Find and replace text in captions, within and across tag boundaries.
    /// The caption is re-split on the separator afterwards.
    pub fn find_and_replace(
        &mut self,
        find_text: &str,
        replace_text: &str,
        scope: Scope,
        use_regex: bool,
    ) -> Result<ChangeReport> {
        if find_text.is_empty() {
            return Ok(ChangeReport::default());
        }
        let regex = if use_regex {
            Some(Regex::new(find_text)?)
        } else {
            None
        };
        self.add_to_undo_stack("Find and Replace", true);
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for index in 0..self.images.len() {
            if !self.image_in_scope(index, scope) {
                continue;
            }
            let image = &mut self.images[index];
            let caption = image.tags.join(&separator);
            let new_caption = match &regex {
                Some(regex) => {
                    if !regex.is_match(&caption) {
                        continue;
                    }
                    regex.replace_all(&caption, replace_text).into_owned()
                }
                None => {
                    if !caption.contains(find_text) {
                        continue;
                    }
                    caption.replace(find_text, replace_text)
                }
            };
            let new_tags: Vec<String> = new_caption
                .split(separator.as_str())
                .map(str::to_string)
                .collect();
            if new_tags == image.tags {
                continue;
            }
            image.tags = new_tags;
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        self.emit_changed(&report);
        Ok(report)
    }

    /// Replace whole tags matching any of `old_tags` (or the regex pattern
    /// in `old_tags[0]`) with `new_tag`
    pub fn rename_tags(
        &mut self,
        old_tags: &[String],
        new_tag: &str,
        scope: Scope,
        use_regex: bool,
    ) -> Result<ChangeReport> {
        let regex = match (use_regex, old_tags.first()) {
            (true, Some(pattern)) => Some(full_match_regex(pattern)?),
            _ => None,
        };
        self.add_to_undo_stack(&format!("Rename {}", pluralize("Tag", old_tags.len())), true);
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for index in 0..self.images.len() {
            if !self.image_in_scope(index, scope) {
                continue;
            }
            let image = &mut self.images[index];
            let new_tags: Vec<String> = image
                .tags
                .iter()
                .map(|tag| {
                    let is_match = match &regex {
                        Some(regex) => regex.is_match(tag),
                        None => old_tags.contains(tag),
                    };
                    if is_match {
                        new_tag.to_string()
                    } else {
                        tag.clone()
                    }
                })
                .collect();
            if new_tags == image.tags {
                continue;
            }
            image.tags = new_tags;
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        self.emit_changed(&report);
        Ok(report)
    }

    /// Delete whole tags matching any of `patterns` (or the regex pattern
    /// in `patterns[0]`)
    pub fn delete_tags(
        &mut self,
        patterns: &[String],
        scope: Scope,
        use_regex: bool,
    ) -> Result<ChangeReport> {
        let regex = match (use_regex, patterns.first()) {
            (true, Some(pattern)) => Some(full_match_regex(pattern)?),
            _ => None,
        };
        self.add_to_undo_stack(&format!("Delete {}", pluralize("Tag", patterns.len())), true);
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for index in 0..self.images.len() {
            if !self.image_in_scope(index, scope) {
                continue;
            }
            let image = &mut self.images[index];
            let new_tags: Vec<String> = image
                .tags
                .iter()
                .filter(|tag| match &regex {
                    Some(regex) => !regex.is_match(tag),
                    None => !patterns.contains(tag),
                })
                .cloned()
                .collect();
            if new_tags == image.tags {
                continue;
            }
            image.tags = new_tags;
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        self.emit_changed(&report);
        Ok(report)
    }

    /// Reorder each image's tags in place with `reorder`, optionally
    /// pinning the first tag. Images whose caption did not change are not
    /// persisted or reported.
    fn reorder_tags<F>(
        &mut self,
        action_name: &str,
        do_not_reorder_first_tag: bool,
        always_changed: bool,
        mut reorder: F,
    ) -> ChangeReport
    where
        F: FnMut(&mut [String]),
    {
        self.add_to_undo_stack(action_name, true);
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for index in 0..self.images.len() {
            let image = &mut self.images[index];
            if image.tags.len() < 2 {
                continue;
            }
            let old_tags = image.tags.clone();
            if do_not_reorder_first_tag {
                reorder(&mut image.tags[1..]);
            } else {
                reorder(&mut image.tags);
            }
            if !always_changed && image.tags == old_tags {
                continue;
            }
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        self.emit_changed(&report);
        report
    }

    /// Sort each image's tags in lexicographic order
    pub fn sort_tags_alphabetically(&mut self, do_not_reorder_first_tag: bool) -> ChangeReport {
        self.reorder_tags("Sort Tags", do_not_reorder_first_tag, false, |tags| {
            tags.sort()
        })
    }

    /// Sort each image's tags by how often they occur across the catalog,
    /// most frequent first. Ties keep their original relative order.
    pub fn sort_tags_by_frequency(
        &mut self,
        tag_counts: &HashMap<String, usize>,
        do_not_reorder_first_tag: bool,
    ) -> ChangeReport {
        self.reorder_tags("Sort Tags", do_not_reorder_first_tag, false, |tags| {
            tags.sort_by(|a, b| {
                let count_a = tag_counts.get(a).copied().unwrap_or(0);
                let count_b = tag_counts.get(b).copied().unwrap_or(0);
                count_b.cmp(&count_a)
            })
        })
    }

    /// Reverse the order of each image's tags
    pub fn reverse_tags_order(&mut self, do_not_reorder_first_tag: bool) -> ChangeReport {
        self.reorder_tags(
            "Reverse Order of Tags",
            do_not_reorder_first_tag,
            true,
            |tags| tags.reverse(),
        )
    }

    /// Shuffle each image's tags randomly
    pub fn shuffle_tags(&mut self, do_not_reorder_first_tag: bool) -> ChangeReport {
        let mut rng = rand::thread_rng();
        self.reorder_tags("Shuffle Tags", do_not_reorder_first_tag, true, |tags| {
            tags.shuffle(&mut rng)
        })
    }

    /// Move sentence tags (ending in `.`) after all other tags. With
    /// `separate_newline`, `#newline` placeholder tags are stripped and
    /// re-inserted before each trailing sentence except the first.
    pub fn sort_sentences_to_bottom(&mut self, separate_newline: bool) -> ChangeReport {
        self.add_to_undo_stack("Sort Sentence Tags", true);
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for index in 0..self.images.len() {
            let image = &mut self.images[index];
            let mut sentence_tags = Vec::new();
            let mut other_tags = Vec::new();
            for tag in image.tags.drain(..) {
                if separate_newline && tag == "#newline" {
                    continue;
                }
                if tag.ends_with('.') {
                    sentence_tags.push(tag);
                } else {
                    other_tags.push(tag);
                }
            }
            if separate_newline {
                if let Some(last_sentence) = sentence_tags.pop() {
                    other_tags.push(last_sentence);
                }
                for tag in sentence_tags {
                    other_tags.push("#newline".to_string());
                    other_tags.push(tag);
                }
            } else {
                other_tags.extend(sentence_tags);
            }
            image.tags = other_tags;
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        self.emit_changed(&report);
        report
    }

    /// Move all occurrences of the listed tags (in the listed order) before
    /// all other tags, which keep their relative order
    pub fn move_tags_to_front(&mut self, tags_to_move: &[String]) -> ChangeReport {
        self.add_to_undo_stack("Move Tags to Front", true);
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for index in 0..self.images.len() {
            let image = &mut self.images[index];
            let mut moved_tags = Vec::new();
            for tag in tags_to_move {
                let occurrences = image.tags.iter().filter(|t| *t == tag).count();
                moved_tags.extend(std::iter::repeat(tag.clone()).take(occurrences));
            }
            if moved_tags.is_empty() {
                continue;
            }
            let unmoved_tags: Vec<String> = image
                .tags
                .iter()
                .filter(|tag| !moved_tags.contains(tag))
                .cloned()
                .collect();
            let mut new_tags = moved_tags;
            new_tags.extend(unmoved_tags);
            if new_tags == image.tags {
                continue;
            }
            image.tags = new_tags;
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        self.emit_changed(&report);
        report
    }

    /// Remove duplicate tags for each image, keeping first occurrences.
    /// Returns the number of removed tags in the report.
    pub fn remove_duplicate_tags(&mut self) -> ChangeReport {
        self.add_to_undo_stack("Remove Duplicate Tags", true);
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for index in 0..self.images.len() {
            let image = &mut self.images[index];
            let mut seen = HashSet::new();
            let new_tags: Vec<String> = image
                .tags
                .iter()
                .filter(|tag| seen.insert((*tag).clone()))
                .cloned()
                .collect();
            if new_tags.len() == image.tags.len() {
                continue;
            }
            report.removed_tag_count += image.tags.len() - new_tags.len();
            image.tags = new_tags;
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        self.emit_changed(&report);
        report
    }

    /// Remove tags that are empty or whitespace-only for each image.
    /// Returns the number of removed tags in the report.
    pub fn remove_empty_tags(&mut self) -> ChangeReport {
        self.add_to_undo_stack("Remove Empty Tags", true);
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for index in 0..self.images.len() {
            let image = &mut self.images[index];
            let old_tag_count = image.tags.len();
            image.tags.retain(|tag| !tag.trim().is_empty());
            if image.tags.len() == old_tag_count {
                continue;
            }
            report.removed_tag_count += old_tag_count - image.tags.len();
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        self.emit_changed(&report);
        report
    }

    /// Append tags to each of the target images, without deduplication
    pub fn add_tags(&mut self, tags: &[String], target_indices: &[usize]) -> ChangeReport {
        let action_name = format!("Add {}", pluralize("Tag", tags.len()));
        self.add_to_undo_stack(&action_name, target_indices.len() > 1);
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for &index in target_indices {
            let Some(image) = self.images.get_mut(index) else {
                continue;
            };
            image.tags.extend(tags.iter().cloned());
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        report.changed_indices.sort_unstable();
        self.emit_changed(&report);
        report
    }

    /// Replace a single image's tag list directly. Used by external tag
    /// editors; does not push a history entry of its own.
    pub fn update_image_tags(&mut self, index: usize, tags: Vec<String>) -> ChangeReport {
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        let Some(image) = self.images.get_mut(index) else {
            return report;
        };
        if image.tags == tags {
            return report;
        }
        image.tags = tags;
        report.changed_indices.push(index);
        persist_tags(image, &separator, &mut report);
        self.emit_changed(&report);
        report
    }

    fn restore_history(&mut self, is_undo: bool, prompt: &dyn ConfirmationPrompt) -> ChangeReport {
        let item = if is_undo {
            self.undo_stack.pop()
        } else {
            self.redo_stack.pop()
        };
        let Some(item) = item else {
            return ChangeReport::default();
        };
        if item.needs_confirmation {
            let title = if is_undo { "Undo" } else { "Redo" };
            let question = format!("{} \"{}\"?", title, item.action_name);
            if !prompt.confirm(title, &question) {
                // The popped entry is dropped, not pushed back.
                debug!("{} of \"{}\" cancelled", title, item.action_name);
                return ChangeReport::default();
            }
        }
        let current = HistoryItem {
            action_name: item.action_name.clone(),
            tags: self.snapshot_tags(),
            needs_confirmation: item.needs_confirmation,
        };
        if is_undo {
            self.redo_stack.push(current);
        } else {
            self.undo_stack.push(current);
        }
        let separator = self.separator.clone();
        let mut report = ChangeReport::default();
        for (index, snapshot) in item.tags.into_iter().enumerate() {
            let Some(image) = self.images.get_mut(index) else {
                break;
            };
            if image.tags == snapshot {
                continue;
            }
            image.tags = snapshot;
            report.changed_indices.push(index);
            persist_tags(image, &separator, &mut report);
        }
        self.emit_changed(&report);
        report
    }

    /// Undo the most recent action; a no-op on an empty stack
    pub fn undo(&mut self, prompt: &dyn ConfirmationPrompt) -> ChangeReport {
        self.restore_history(true, prompt)
    }

    /// Redo the most recently undone action; a no-op on an empty stack
    pub fn redo(&mut self, prompt: &dyn ConfirmationPrompt) -> ChangeReport {
        self.restore_history(false, prompt)
    }

    /// Set or clear an image's crop rectangle, invalidating its cached
    /// target dimension, and persist the metadata sidecar
    pub fn set_crop(&mut self, index: usize, crop: Option<Rect>) -> Result<()> {
        let Some(image) = self.images.get_mut(index) else {
            return Ok(());
        };
        image.crop = crop;
        image.target_dimension = None;
        write_meta_file(image)
    }

    /// Set an image's rating and persist the metadata sidecar
    pub fn set_rating(&mut self, index: usize, rating: f64) -> Result<()> {
        let Some(image) = self.images.get_mut(index) else {
            return Ok(());
        };
        image.rating = rating.clamp(0.0, 1.0);
        write_meta_file(image)
    }

    /// Append markings to an image and persist the metadata sidecar
    pub fn add_markings(&mut self, index: usize, markings: Vec<Marking>) -> Result<()> {
        if markings.is_empty() {
            return Ok(());
        }
        let Some(image) = self.images.get_mut(index) else {
            return Ok(());
        };
        image.markings.extend(markings);
        write_meta_file(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterNode, GlobField};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct NeverConfirm;

    impl ConfirmationPrompt for NeverConfirm {
        fn confirm(&self, _title: &str, _question: &str) -> bool {
            false
        }
    }

    fn suffixes() -> Vec<String> {
        vec![".png".to_string(), ".jpg".to_string()]
    }

    /// Create a directory of real images with optional caption sidecars
    fn fixture(entries: &[(&str, Option<&str>)]) -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        for (name, caption) in entries {
            let path = dir.path().join(name);
            image::RgbImage::new(4, 4).save(&path).unwrap();
            if let Some(caption) = caption {
                std::fs::write(path.with_extension("txt"), caption).unwrap();
            }
        }
        let mut catalog = Catalog::new(", ", &ExportConfig::default());
        catalog.load_directory(dir.path(), &suffixes()).unwrap();
        (dir, catalog)
    }

    fn tags(catalog: &Catalog, index: usize) -> Vec<String> {
        catalog.images()[index].tags.clone()
    }

    #[test]
    fn test_load_directory_reads_sidecars_and_sorts() {
        let (_dir, catalog) = fixture(&[
            ("b.png", Some("sky, night")),
            ("a.png", None),
            ("c.jpg", Some("")),
        ]);
        assert_eq!(catalog.len(), 3);
        // Sorted by path.
        assert_eq!(catalog.images()[0].file_name(), "a.png");
        assert_eq!(tags(&catalog, 0), Vec::<String>::new());
        assert_eq!(tags(&catalog, 1), vec!["sky", "night"]);
        // Empty sidecar means an empty tag list.
        assert_eq!(tags(&catalog, 2), Vec::<String>::new());
        assert_eq!(catalog.images()[0].dimensions, Some((4, 4)));
    }

    #[test]
    fn test_load_directory_keeps_unreadable_image() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        let mut catalog = Catalog::new(", ", &ExportConfig::default());
        catalog.load_directory(dir.path(), &suffixes()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.images()[0].dimensions, None);
    }

    #[test]
    fn test_load_directory_reads_meta_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        image::RgbaImage::new(4, 4).save(&path).unwrap();
        std::fs::write(
            path.with_extension("json"),
            r#"{"version": 1, "rating": 0.4, "crop": [0, 0, 2, 2],
                "markings": [{"label": "face", "type": "HINT",
                              "rect": [1, 1, 2, 2], "confidence": 0.7}]}"#,
        )
        .unwrap();
        let mut catalog = Catalog::new(", ", &ExportConfig::default());
        catalog.load_directory(dir.path(), &suffixes()).unwrap();
        let image = &catalog.images()[0];
        assert_eq!(image.rating, 0.4);
        assert_eq!(image.crop, Some(Rect::new(0, 0, 2, 2)));
        assert_eq!(image.markings.len(), 1);
        assert_eq!(image.markings[0].confidence, 0.7);
    }

    #[test]
    fn test_tags_round_trip_through_disk() {
        let (dir, mut catalog) = fixture(&[("a.png", None)]);
        let tags_in = vec!["one".to_string(), "two three".to_string()];
        catalog.update_image_tags(0, tags_in.clone());
        let written = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(written, "one, two three");
        catalog.load_directory(dir.path(), &suffixes()).unwrap();
        assert_eq!(tags(&catalog, 0), tags_in);
    }

    #[test]
    fn test_find_and_replace_spans_tag_boundaries() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("red hat, blue coat"))]);
        let report = catalog
            .find_and_replace("hat, blue", "scarf, green", Scope::All, false)
            .unwrap();
        assert_eq!(report.changed_count(), 1);
        assert_eq!(tags(&catalog, 0), vec!["red scarf", "green coat"]);
    }

    #[test]
    fn test_find_and_replace_regex_and_no_change() {
        let (_dir, mut catalog) =
            fixture(&[("a.png", Some("cat01, cat02")), ("b.png", Some("dog"))]);
        let report = catalog
            .find_and_replace(r"cat\d+", "cat", Scope::All, true)
            .unwrap();
        assert_eq!(report.changed_indices, vec![0]);
        assert_eq!(tags(&catalog, 0), vec!["cat", "cat"]);
        assert_eq!(tags(&catalog, 1), vec!["dog"]);
        // An invalid pattern is an error before any history is pushed.
        let before = catalog.can_undo();
        assert!(catalog.find_and_replace("(", "x", Scope::All, true).is_err());
        assert_eq!(catalog.can_undo(), before);
    }

    #[test]
    fn test_rename_and_delete_whole_tags() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("cat, catfish, cat"))]);
        catalog
            .rename_tags(&["cat".to_string()], "feline", Scope::All, false)
            .unwrap();
        assert_eq!(tags(&catalog, 0), vec!["feline", "catfish", "feline"]);
        catalog
            .delete_tags(&["cat.*".to_string()], Scope::All, true)
            .unwrap();
        assert_eq!(tags(&catalog, 0), vec!["feline", "feline"]);
    }

    #[test]
    fn test_scoped_mutation() {
        let (_dir, mut catalog) =
            fixture(&[("a.png", Some("cat, old")), ("b.png", Some("dog, old"))]);
        let filter = FilterNode::FieldGlob(GlobField::Tag, "dog".to_string());
        catalog
            .delete_tags(
                &["old".to_string()],
                Scope::Filtered(Some(&filter)),
                false,
            )
            .unwrap();
        assert_eq!(tags(&catalog, 0), vec!["cat", "old"]);
        assert_eq!(tags(&catalog, 1), vec!["dog"]);

        let selection: HashSet<PathBuf> =
            [catalog.images()[0].path.clone()].into_iter().collect();
        catalog
            .rename_tags(
                &["cat".to_string()],
                "feline",
                Scope::Selected(&selection),
                false,
            )
            .unwrap();
        assert_eq!(tags(&catalog, 0), vec!["feline", "old"]);
    }

    #[test]
    fn test_sort_alphabetically_keeps_first_tag() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("z, b, a"))]);
        catalog.sort_tags_alphabetically(true);
        assert_eq!(tags(&catalog, 0), vec!["z", "a", "b"]);
    }

    #[test]
    fn test_sort_by_frequency_is_stable() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("rare, common, also rare"))]);
        let mut counts = HashMap::new();
        counts.insert("common".to_string(), 10);
        counts.insert("rare".to_string(), 1);
        counts.insert("also rare".to_string(), 1);
        catalog.sort_tags_by_frequency(&counts, false);
        // Ties keep their original relative order.
        assert_eq!(tags(&catalog, 0), vec!["common", "rare", "also rare"]);
    }

    #[test]
    fn test_move_tags_to_front_preserves_multiplicity() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("a, b, c, b, d"))]);
        catalog.move_tags_to_front(&["c".to_string(), "b".to_string()]);
        assert_eq!(tags(&catalog, 0), vec!["c", "b", "b", "a", "d"]);
    }

    #[test]
    fn test_remove_duplicate_tags() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("a, b, a, c, b"))]);
        let report = catalog.remove_duplicate_tags();
        assert_eq!(tags(&catalog, 0), vec!["a", "b", "c"]);
        assert_eq!(report.removed_tag_count, 2);
    }

    #[test]
    fn test_remove_empty_tags() {
        let (_dir, mut catalog) = fixture(&[("a.png", None)]);
        catalog.images[0].tags = vec!["a".into(), "  ".into(), "b".into(), "".into()];
        let report = catalog.remove_empty_tags();
        assert_eq!(catalog.images()[0].tags, vec!["a", "b"]);
        assert_eq!(report.removed_tag_count, 2);
    }

    #[test]
    fn test_sort_sentences_to_bottom() {
        let (_dir, mut catalog) =
            fixture(&[("a.png", Some("A cat sits., cat, fluffy, It rains."))]);
        catalog.sort_sentences_to_bottom(false);
        assert_eq!(
            tags(&catalog, 0),
            vec!["cat", "fluffy", "A cat sits.", "It rains."]
        );
    }

    #[test]
    fn test_sort_sentences_with_newline_separators() {
        let (_dir, mut catalog) = fixture(&[(
            "a.png",
            Some("One., cat, #newline, Two., Three."),
        )]);
        catalog.sort_sentences_to_bottom(true);
        // The last sentence leads the trailing block; the others follow,
        // each preceded by a #newline placeholder.
        assert_eq!(
            tags(&catalog, 0),
            vec!["cat", "Three.", "#newline", "One.", "#newline", "Two."]
        );
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("a, b, a"))]);
        let original = tags(&catalog, 0);
        catalog.remove_duplicate_tags();
        let mutated = tags(&catalog, 0);
        assert_ne!(original, mutated);

        catalog.undo(&AlwaysConfirm);
        assert_eq!(tags(&catalog, 0), original);
        assert!(catalog.can_redo());

        catalog.redo(&AlwaysConfirm);
        assert_eq!(tags(&catalog, 0), mutated);

        // A new mutation clears the redo stack.
        catalog.undo(&AlwaysConfirm);
        catalog.sort_tags_alphabetically(false);
        assert!(!catalog.can_redo());
    }

    #[test]
    fn test_undo_restores_disk_state() {
        let (dir, mut catalog) = fixture(&[("a.png", Some("b, a"))]);
        catalog.sort_tags_alphabetically(false);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "a, b"
        );
        catalog.undo(&AlwaysConfirm);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "b, a"
        );
    }

    #[test]
    fn test_undo_on_empty_stack_is_noop() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("a"))]);
        let report = catalog.undo(&AlwaysConfirm);
        assert_eq!(report.changed_count(), 0);
        assert_eq!(tags(&catalog, 0), vec!["a"]);
    }

    #[test]
    fn test_cancelled_undo_discards_entry() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("a, a"))]);
        catalog.remove_duplicate_tags();
        assert!(catalog.can_undo());
        let report = catalog.undo(&NeverConfirm);
        assert_eq!(report.changed_count(), 0);
        // The entry is dropped, not pushed back.
        assert!(!catalog.can_undo());
        assert_eq!(tags(&catalog, 0), vec!["a"]);
    }

    #[test]
    fn test_add_tags_always_pushes_history() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("a"))]);
        assert!(!catalog.can_undo());
        catalog.add_tags(&["b".to_string()], &[]);
        // Even a no-op mutation records a history entry.
        assert!(catalog.can_undo());
        catalog.add_tags(&["b".to_string()], &[0]);
        assert_eq!(tags(&catalog, 0), vec!["a", "b"]);
    }

    #[test]
    fn test_changed_range_callback() {
        let (_dir, mut catalog) = fixture(&[
            ("a.png", Some("x, x")),
            ("b.png", Some("y")),
            ("c.png", Some("z, z")),
        ]);
        let ranges = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&ranges);
        catalog.set_tags_changed_callback(Box::new(move |first, last| {
            sink.borrow_mut().push((first, last));
        }));
        catalog.remove_duplicate_tags();
        assert_eq!(ranges.borrow().as_slice(), &[(0, 2)]);
    }

    #[test]
    fn test_get_text_match_count() {
        let (_dir, catalog) =
            fixture(&[("a.png", Some("cat, catfish")), ("b.png", Some("cat"))]);
        assert_eq!(
            catalog
                .get_text_match_count("cat", Scope::All, true, false)
                .unwrap(),
            2
        );
        assert_eq!(
            catalog
                .get_text_match_count("cat", Scope::All, false, false)
                .unwrap(),
            3
        );
        assert_eq!(
            catalog
                .get_text_match_count("cat.*", Scope::All, true, true)
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_target_dimension_cached_and_invalidated() {
        let (_dir, mut catalog) = fixture(&[("a.png", Some("a"))]);
        catalog.images[0].dimensions = Some((2000, 1000));
        assert_eq!(catalog.target_dimension(0), Some((1408, 704)));
        assert_eq!(catalog.images()[0].target_dimension, Some((1408, 704)));

        // A crop changes the source dimensions.
        catalog.set_crop(0, Some(Rect::new(0, 0, 1000, 1000))).unwrap();
        assert!(catalog.images()[0].target_dimension.is_none());
        let square = catalog.target_dimension(0).unwrap();
        assert_eq!(square.0, square.1);

        // Reconfiguring the export settings clears the cache again.
        let export = ExportConfig {
            resolution: 0,
            ..ExportConfig::default()
        };
        catalog.set_export_config(&export);
        assert!(catalog.images()[0].target_dimension.is_none());
        assert_eq!(catalog.target_dimension(0), Some((960, 960)));
    }

    #[test]
    fn test_history_snapshot_covers_whole_batch() {
        let (_dir, mut catalog) =
            fixture(&[("a.png", Some("b, a")), ("b.png", Some("d, c"))]);
        catalog.sort_tags_alphabetically(false);
        assert_eq!(tags(&catalog, 0), vec!["a", "b"]);
        assert_eq!(tags(&catalog, 1), vec!["c", "d"]);
        let report = catalog.undo(&AlwaysConfirm);
        assert_eq!(report.changed_range(), Some((0, 1)));
        assert_eq!(tags(&catalog, 0), vec!["b", "a"]);
        assert_eq!(tags(&catalog, 1), vec!["d", "c"]);
    }
}
