//! Localised names and descriptions.
//!
//! Locale rows are insert-only: the first writer for `(ident, locale, part)` wins,
//! so hand-curated text is never overwritten by a later fetch.

use super::ident::Ident;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;

pub const DEFAULT_LOCALE: &str = "en";
const CURRENT_LOCALE_KEY: &str = "locale_current";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalePart {
    Name,
    Description,
}

impl LocalePart {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalePart::Name => "name",
            LocalePart::Description => "description",
        }
    }
}

/// A primary language subtag, e.g. `ja` out of `ja-JP`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale(String);

impl Locale {
    /// Reduces a BCP 47 tag to its primary language subtag.
    pub fn from_bcp47(tag: &str) -> Option<Locale> {
        let primary = tag.split(['-', '_']).next()?.to_ascii_lowercase();
        let valid = (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_alphabetic());
        valid.then_some(Locale(primary))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale(DEFAULT_LOCALE.to_string())
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns true if the text was stored, false if a row for the key already existed.
pub fn insert_text(
    conn: &Connection,
    ident: &Ident,
    locale: &Locale,
    part: LocalePart,
    text: &str,
) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO locale (ident, locale, part, text) VALUES (?1, ?2, ?3, ?4)",
        params![ident.to_string(), locale.as_str(), part.as_str(), text],
    )?;
    Ok(changed > 0)
}

pub fn text(
    conn: &Connection,
    ident: &Ident,
    locale: &Locale,
    part: LocalePart,
) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT text FROM locale WHERE ident = ?1 AND locale = ?2 AND part = ?3",
            params![ident.to_string(), locale.as_str(), part.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Text in the current display locale, falling back to the earliest stored locale.
pub fn preferred_text(conn: &Connection, ident: &Ident, part: LocalePart) -> Result<Option<String>> {
    let current = current_locale(conn)?;
    if let Some(found) = text(conn, ident, &current, part)? {
        return Ok(Some(found));
    }
    Ok(conn
        .query_row(
            "SELECT text FROM locale WHERE ident = ?1 AND part = ?2 ORDER BY rowid LIMIT 1",
            params![ident.to_string(), part.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn current_locale(conn: &Connection) -> Result<Locale> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            params![CURRENT_LOCALE_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(stored
        .and_then(|tag| Locale::from_bcp47(&tag))
        .unwrap_or_default())
}

pub fn set_current_locale(conn: &Connection, locale: &Locale) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![CURRENT_LOCALE_KEY, locale.as_str()],
    )?;
    Ok(())
}
