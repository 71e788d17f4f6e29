//! Line protocol for capturing and replaying builder calls.
//!
//! A recorded session is plain text, one event per line:
//!
//! ```text
//! Def 1 DefineName[main]
//! Def 2 DefineReturnType[Int64]
//! B1 ConstInt64[3] 5
//! B1 Add[] 7 5 6
//! ```
//!
//! - `Def <id> <name>[<payload>]` binds the numeric ID to a named construction event.
//! - `B<id> <name>[<payload>] <ids...>` replays one call against the builder defined as `<id>`,
//!   followed by the IDs of its operands and results.
//!
//! IDs are unsigned 32-bit integers handed out in increasing order and unique within a session.
//! Defining an ID twice is fatal, as is a statement naming a builder that was never defined.
//! Payloads are opaque to the protocol but cannot contain `]` or line breaks.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// One parsed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `Def <id> <name>[<payload>]`
    Def {
        /// The defined ID
        id: u32,
        /// Event name
        name: String,
        /// Bracketed payload
        payload: String,
    },
    /// `B<builder> <name>[<payload>] <operands...>`
    Statement {
        /// ID of the builder the call is replayed against
        builder: u32,
        /// Call name
        name: String,
        /// Bracketed payload
        payload: String,
        /// Operand and result IDs
        operands: Vec<u32>,
    },
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Def { id, name, payload } => write!(f, "Def {id} {name}[{payload}]"),
            Record::Statement {
                builder,
                name,
                payload,
                operands,
            } => {
                write!(f, "B{builder} {name}[{payload}]")?;
                for operand in operands {
                    write!(f, " {operand}")?;
                }
                Ok(())
            }
        }
    }
}

fn check_token(name: &str, payload: &str) -> Result<()> {
    if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '[' || c == ']') {
        return Err(contract_violation!("'{}' is not a valid event name", name));
    }
    if payload.contains([']', '\n', '\r']) {
        return Err(contract_violation!(
            "payload of '{}' contains a reserved character",
            name
        ));
    }
    Ok(())
}

/// Writes a session.
#[derive(Debug, Clone)]
pub struct Recorder {
    records: Vec<Record>,
    names: FxHashMap<u32, String>,
    next_id: u32,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            names: FxHashMap::default(),
            next_id: 1,
        }
    }
}

impl Recorder {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines the next free ID for the event `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or payload cannot be encoded or the ID space is exhausted.
    pub fn define(&mut self, name: &str, payload: &str) -> Result<u32> {
        let id = self.next_id;
        self.define_with(id, name, payload)?;
        Ok(id)
    }

    /// Defines `id` for the event `name`.
    ///
    /// IDs only grow: `id` may skip ahead of the next free ID, the IDs skipped over can no
    /// longer be defined afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if `id` was defined before, or a contract violation if it
    /// lies below the next free ID.
    pub fn define_with(&mut self, id: u32, name: &str, payload: &str) -> Result<()> {
        if self.names.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        if id < self.next_id {
            return Err(contract_violation!(
                "protocol ID {} lies below the next free ID {}",
                id,
                self.next_id
            ));
        }
        check_token(name, payload)?;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| contract_violation!("protocol ID space exhausted"))?;
        self.names.insert(id, name.to_string());
        self.records.push(Record::Def {
            id,
            name: name.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    /// Records a call against `builder`.
    ///
    /// # Errors
    ///
    /// Returns an error if `builder` is not defined or the call cannot be encoded.
    pub fn statement(
        &mut self,
        builder: u32,
        name: &str,
        payload: &str,
        operands: &[u32],
    ) -> Result<()> {
        if !self.names.contains_key(&builder) {
            return Err(contract_violation!("builder B{} is not defined", builder));
        }
        check_token(name, payload)?;
        self.records.push(Record::Statement {
            builder,
            name: name.to_string(),
            payload: payload.to_string(),
            operands: operands.to_vec(),
        });
        Ok(())
    }

    /// Recorded events in order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Renders the session, one line per event.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for record in &self.records {
            text.push_str(&record.to_string());
            text.push('\n');
        }
        text
    }
}

/// Parses and validates a session.
#[derive(Debug, Clone, Default)]
pub struct ReplayReader {
    names: FxHashMap<u32, String>,
    line: usize,
}

impl ReplayReader {
    /// Creates a reader with no IDs defined.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a whole session.
    ///
    /// # Errors
    ///
    /// Returns the first malformed or invalid line.
    pub fn parse(text: &str) -> Result<Vec<Record>> {
        let mut reader = Self::new();
        let mut records = Vec::new();
        for line in text.lines() {
            if let Some(record) = reader.parse_line(line)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Name bound to `id`.
    #[must_use]
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Parses the next line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Record`] for malformed lines or statements against an undefined
    /// builder, and [`Error::DuplicateId`] for a redefinition.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<Record>> {
        self.line += 1;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }

        let (first, rest) = line.split_once(' ').unwrap_or((line, ""));
        if first == "Def" {
            let (id, rest) = rest.split_once(' ').ok_or_else(|| self.malformed("missing event"))?;
            let id = self.parse_id(id)?;
            let (name, payload, tail) = self.split_event(rest)?;
            if !tail.trim().is_empty() {
                return Err(self.malformed("definitions take no operands"));
            }
            if self.names.contains_key(&id) {
                return Err(Error::DuplicateId(id));
            }
            self.names.insert(id, name.clone());
            return Ok(Some(Record::Def { id, name, payload }));
        }

        let Some(builder) = first.strip_prefix('B') else {
            return Err(self.malformed(&format!("unexpected token '{first}'")));
        };
        let builder = self.parse_id(builder)?;
        if !self.names.contains_key(&builder) {
            return Err(self.malformed(&format!("builder B{builder} is not defined")));
        }
        let (name, payload, tail) = self.split_event(rest)?;
        let operands = tail
            .split_whitespace()
            .map(|token| self.parse_id(token))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Record::Statement {
            builder,
            name,
            payload,
            operands,
        }))
    }

    fn malformed(&self, message: &str) -> Error {
        Error::Record {
            line: self.line,
            message: message.to_string(),
        }
    }

    fn parse_id(&self, token: &str) -> Result<u32> {
        token
            .parse::<u32>()
            .map_err(|_| self.malformed(&format!("'{token}' is not an ID")))
    }

    /// Splits `name[payload] tail`.
    fn split_event<'l>(&self, text: &'l str) -> Result<(String, String, &'l str)> {
        let open = text.find('[').ok_or_else(|| self.malformed("missing '['"))?;
        let close = text[open..]
            .find(']')
            .map(|i| open + i)
            .ok_or_else(|| self.malformed("missing ']'"))?;
        let name = &text[..open];
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(self.malformed(&format!("'{name}' is not a valid event name")));
        }
        Ok((
            name.to_string(),
            text[open + 1..close].to_string(),
            &text[close + 1..],
        ))
    }
}
