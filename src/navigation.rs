use crate::catalog::{KeyCatalog, SliceKey};
use crate::error::{Error, Result};

/// One navigation request from the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavCommand {
    Previous,
    Next,
    NextUnviewed,
    JumpTo(String),
}

/// Current position within the catalog.
#[derive(Debug, Clone)]
pub struct Navigator {
    catalog: KeyCatalog,
    index: usize,
}

impl Navigator {
    pub fn new(catalog: KeyCatalog) -> Self {
        Self { catalog, index: 0 }
    }

    pub fn catalog(&self) -> &KeyCatalog {
        &self.catalog
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Result<&SliceKey> {
        self.catalog.get(self.index).ok_or(Error::EmptyCatalog)
    }

    /// Returns `true` if the position changed. No wraparound.
    pub fn next(&mut self) -> bool {
        if self.index + 1 < self.catalog.len() {
            self.index += 1;
            true
        } else {
            false
        }
    }

    /// Returns `true` if the position changed. No wraparound.
    pub fn previous(&mut self) -> bool {
        if self.index > 0 && !self.catalog.is_empty() {
            self.index -= 1;
            true
        } else {
            false
        }
    }

    /// Returns `true` if the position changed.
    pub fn jump_to(&mut self, raw: &str) -> Result<bool> {
        let target = self
            .catalog
            .position(raw)
            .ok_or_else(|| Error::UnknownKey(raw.to_string()))?;
        let moved = target != self.index;
        self.index = target;
        Ok(moved)
    }

    /// Moves to the first unviewed slice after the current one, wrapping
    /// around to the start. The current slice itself is never a candidate,
    /// so when nothing else is unviewed the position is left unchanged.
    pub fn next_unviewed<F>(&mut self, is_viewed: F) -> Result<bool>
    where
        F: Fn(&SliceKey) -> bool,
    {
        let len = self.catalog.len();
        if len == 0 {
            return Err(Error::EmptyCatalog);
        }
        let found = (1..len)
            .map(|offset| (self.index + offset) % len)
            .find(|&i| self.catalog.get(i).is_some_and(|k| !is_viewed(k)));
        match found {
            Some(i) => {
                self.index = i;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies `command`, returning whether the position changed.
    pub fn apply<F>(&mut self, command: &NavCommand, is_viewed: F) -> Result<bool>
    where
        F: Fn(&SliceKey) -> bool,
    {
        if self.catalog.is_empty() {
            return Err(Error::EmptyCatalog);
        }
        match command {
            NavCommand::Previous => Ok(self.previous()),
            NavCommand::Next => Ok(self.next()),
            NavCommand::NextUnviewed => self.next_unviewed(is_viewed),
            NavCommand::JumpTo(raw) => self.jump_to(raw),
        }
    }
}
