//! Folder tree derivation. Containment is by name, so any name referenced by a
//! note (or as a parent) without a matching folder row becomes a virtual node.

use std::collections::{BTreeSet, HashMap, HashSet};

use stickies_core::{Color, EntityId, Note};

use crate::error::EngineError;
use crate::store::EntityStore;

pub const VIRTUAL_PREFIX: &str = "virtual-";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FolderRef {
    Row(EntityId),
    Virtual(String),
}

impl FolderRef {
    /// Stable key for UI lists. Virtual folders use `virtual-<name>`.
    pub fn key(&self) -> String {
        match self {
            FolderRef::Row(id) => id.to_string(),
            FolderRef::Virtual(name) => format!("{VIRTUAL_PREFIX}{name}"),
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, FolderRef::Virtual(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSummary {
    pub folder: FolderRef,
    pub name: String,
    pub parent: Option<String>,
    pub color: Color,
    pub icon: Option<String>,
    pub order: i64,
    pub note_count: usize,
    pub subfolder_count: usize,
    pub is_system: bool,
}

impl FolderSummary {
    pub fn is_virtual(&self) -> bool {
        self.folder.is_virtual()
    }
}

/// Session-local color and icon choices that take precedence over row values.
#[derive(Debug, Default, Clone)]
pub struct FolderOverrides {
    colors: HashMap<String, Color>,
    icons: HashMap<String, String>,
}

impl FolderOverrides {
    pub fn set_color(&mut self, name: &str, color: Option<Color>) {
        match color {
            Some(c) => self.colors.insert(name.to_string(), c),
            None => self.colors.remove(name),
        };
    }

    pub fn set_icon(&mut self, name: &str, icon: Option<&str>) {
        match icon {
            Some(i) => self.icons.insert(name.to_string(), i.to_string()),
            None => self.icons.remove(name),
        };
    }

    pub fn color(&self, name: &str) -> Option<&Color> {
        self.colors.get(name)
    }

    pub fn icon(&self, name: &str) -> Option<&str> {
        self.icons.get(name).map(String::as_str)
    }

    pub fn rename(&mut self, old: &str, new: &str) {
        if let Some(c) = self.colors.remove(old) {
            self.colors.insert(new.to_string(), c);
        }
        if let Some(i) = self.icons.remove(old) {
            self.icons.insert(new.to_string(), i);
        }
    }

    pub fn forget(&mut self, name: &str) {
        self.colors.remove(name);
        self.icons.remove(name);
    }
}

/// Flat list of every folder, real and virtual, sorted for display. Rows sort
/// by `order` then name, virtual folders follow alphabetically, and system
/// folders are pinned last in configured order.
pub fn resolve_folders(
    store: &EntityStore,
    overrides: &FolderOverrides,
    system_folders: &[String],
) -> Vec<FolderSummary> {
    let mut note_counts: HashMap<&str, usize> = HashMap::new();
    for note in store.notes() {
        *note_counts.entry(note.folder_name.as_str()).or_default() += 1;
    }
    let mut child_counts: HashMap<&str, usize> = HashMap::new();
    for folder in store.folders() {
        if let Some(parent) = folder.parent.as_deref() {
            *child_counts.entry(parent).or_default() += 1;
        }
    }

    let row_names: HashSet<&str> = store.folders().map(|f| f.name.as_str()).collect();
    let virtual_names: BTreeSet<&str> = store
        .notes()
        .map(|n| n.folder_name.as_str())
        .chain(store.folders().filter_map(|f| f.parent.as_deref()))
        .filter(|name| !row_names.contains(name))
        .collect();

    let count = |map: &HashMap<&str, usize>, name: &str| map.get(name).copied().unwrap_or(0);

    let mut summaries: Vec<FolderSummary> = store
        .folders()
        .map(|f| FolderSummary {
            folder: FolderRef::Row(f.id),
            name: f.name.clone(),
            parent: f.parent.clone(),
            color: overrides.color(&f.name).unwrap_or(&f.color).clone(),
            icon: overrides
                .icon(&f.name)
                .map(str::to_string)
                .or_else(|| f.icon.clone()),
            order: f.order,
            note_count: count(&note_counts, &f.name),
            subfolder_count: count(&child_counts, &f.name),
            is_system: system_folders.iter().any(|s| *s == f.name),
        })
        .collect();

    for name in virtual_names {
        summaries.push(FolderSummary {
            folder: FolderRef::Virtual(name.to_string()),
            name: name.to_string(),
            parent: None,
            color: virtual_color(store, overrides, name),
            icon: overrides.icon(name).map(str::to_string),
            order: i64::MAX,
            note_count: count(&note_counts, name),
            subfolder_count: count(&child_counts, name),
            is_system: system_folders.iter().any(|s| s == name),
        });
    }

    summaries.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));

    let (mut regular, system): (Vec<_>, Vec<_>) =
        summaries.into_iter().partition(|s| !s.is_system);
    for wanted in system_folders {
        regular.extend(system.iter().filter(|s| s.name == *wanted).cloned());
    }
    regular
}

fn virtual_color(store: &EntityStore, overrides: &FolderOverrides, name: &str) -> Color {
    if let Some(c) = overrides.color(name) {
        return c.clone();
    }
    store
        .notes_in(name)
        .first()
        .map(|n| n.color.clone())
        .unwrap_or_else(Color::fallback)
}

pub fn find<'a>(folders: &'a [FolderSummary], name: &str) -> Option<&'a FolderSummary> {
    folders.iter().find(|f| f.name == name)
}

/// Folders directly under `parent` (`None` = top level), in display order.
pub fn children_of<'a>(folders: &'a [FolderSummary], parent: Option<&str>) -> Vec<&'a FolderSummary> {
    folders
        .iter()
        .filter(|f| f.parent.as_deref() == parent)
        .collect()
}

/// Full path from the top level down to `name`, inclusive. Stops at a missing
/// parent or a cycle.
pub fn ancestor_chain(folders: &[FolderSummary], name: &str) -> Result<Vec<String>, EngineError> {
    let mut current = find(folders, name).ok_or_else(|| EngineError::FolderNotFound(name.to_string()))?;
    let mut chain = vec![current.name.clone()];
    let mut seen: HashSet<&str> = HashSet::from([current.name.as_str()]);
    while let Some(parent) = current.parent.as_deref() {
        let Some(next) = find(folders, parent) else {
            break;
        };
        if !seen.insert(next.name.as_str()) {
            tracing::warn!(folder = name, "folder parent cycle");
            break;
        }
        chain.push(next.name.clone());
        current = next;
    }
    chain.reverse();
    Ok(chain)
}

/// True if `candidate` sits somewhere below `ancestor`.
pub fn is_descendant(folders: &[FolderSummary], candidate: &str, ancestor: &str) -> bool {
    ancestor_chain(folders, candidate)
        .map(|chain| chain.iter().rev().skip(1).any(|n| n == ancestor))
        .unwrap_or(false)
}

/// Lowercase slug used in shareable paths: runs of anything but `a-z0-9`
/// collapse to `-`.
pub fn url_token(value: &str) -> String {
    let mut token = String::new();
    for ch in value.trim().to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            token.push(ch);
        } else if !token.ends_with('-') {
            token.push('-');
        }
    }
    token.trim_matches('-').to_string()
}

/// What the current folder level shows: sub-folders first, then notes.
#[derive(Debug)]
pub struct ActiveItems<'a> {
    pub folders: Vec<FolderSummary>,
    pub notes: Vec<&'a Note>,
}

pub fn active_items<'a>(
    store: &'a EntityStore,
    folders: &[FolderSummary],
    current: Option<&str>,
) -> ActiveItems<'a> {
    ActiveItems {
        folders: children_of(folders, current).into_iter().cloned().collect(),
        notes: current.map(|name| store.notes_in(name)).unwrap_or_default(),
    }
}

/// Breadcrumb stack of folder names, top level first.
#[derive(Debug, Default, Clone)]
pub struct Navigator {
    stack: Vec<String>,
}

impl Navigator {
    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    pub fn current(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    /// Enter a folder, rebuilding the whole path unless the stack already
    /// ends at its parent.
    pub fn enter(&mut self, folders: &[FolderSummary], name: &str) -> Result<(), EngineError> {
        let chain = ancestor_chain(folders, name)?;
        let extends = chain.len() == self.stack.len() + 1 && chain.starts_with(&self.stack);
        if extends {
            self.stack.push(name.to_string());
        } else {
            tracing::debug!(folder = name, depth = chain.len(), "breadcrumb rebuilt");
            self.stack = chain;
        }
        Ok(())
    }

    pub fn back(&mut self) -> Option<&str> {
        self.stack.pop();
        self.current()
    }

    /// Jump to breadcrumb `index`, dropping everything after it.
    pub fn go_to(&mut self, index: usize) {
        self.stack.truncate(index.saturating_add(1));
    }

    pub fn root(&mut self) {
        self.stack.clear();
    }

    pub fn path_token(&self) -> String {
        self.stack
            .iter()
            .map(|n| url_token(n))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve a `/`-separated token path. The deepest segment that names a
    /// known folder wins and the breadcrumb is rebuilt from its ancestors.
    pub fn deep_link(&mut self, folders: &[FolderSummary], path: &str) -> Option<&str> {
        let target = path
            .split('/')
            .map(str::trim)
            .filter(|seg| !seg.is_empty())
            .filter_map(|seg| folders.iter().find(|f| url_token(&f.name) == seg))
            .last()?;
        let name = target.name.clone();
        self.stack = ancestor_chain(folders, &name).ok()?;
        self.current()
    }

    pub fn rename(&mut self, old: &str, new: &str) {
        for frame in self.stack.iter_mut().filter(|f| *f == old) {
            *frame = new.to_string();
        }
    }

    /// Drop `name` and everything below it from the stack.
    pub fn forget(&mut self, name: &str) {
        if let Some(pos) = self.stack.iter().position(|f| f == name) {
            self.stack.truncate(pos);
        }
    }
}

/// Find a note by its title token, preferring one inside `folder`.
pub fn resolve_note_token(store: &EntityStore, folder: Option<&str>, token: &str) -> Option<EntityId> {
    let mut matches = store.notes().filter(|n| url_token(&n.title) == token);
    match folder {
        Some(f) => {
            let all: Vec<&Note> = matches.collect();
            all.iter()
                .find(|n| n.folder_name == f)
                .or_else(|| all.first())
                .map(|n| n.id)
        }
        None => matches.next().map(|n| n.id),
    }
}
