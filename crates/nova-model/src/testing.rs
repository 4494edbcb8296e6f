//! In-memory collaborators for tests and embedders.
//!
//! [`InMemoryResources`] stores files in a map keyed by path. [`LineFrontEnd`]
//! parses a tiny line-oriented language:
//!
//! ```text
//! import java.util.List
//! class Foo extends Bar
//!   field count int = 0
//!   method run void
//!   init
//! !error unterminated string
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;

use nova_memory::CancellationToken;
use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::body::{ElementBody, OpenedUnit, Payload, SourceRange};
use crate::error::ParseError;
use crate::front_end::{CompilerFrontEnd, UnitContents};
use crate::handle::{ElementKind, Handle};
use crate::resource::{ResourceEntry, ResourceLayer, ResourcePath};

/// A [`ResourceLayer`] backed by a map of paths to bytes. Folders exist
/// implicitly while they contain a file.
#[derive(Debug, Default)]
pub struct InMemoryResources {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    reads: AtomicUsize,
}

impl InMemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let resources = Self::new();
        for (path, contents) in files {
            resources.insert(path, contents);
        }
        resources
    }

    pub fn insert(&self, path: &str, contents: &str) {
        self.files.lock().insert(
            ResourcePath::new(path).as_str().to_owned(),
            contents.as_bytes().to_vec(),
        );
    }

    /// Removes a file behind the model's back, as an external tool would.
    pub fn remove(&self, path: &str) -> bool {
        self.files
            .lock()
            .remove(ResourcePath::new(path).as_str())
            .is_some()
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .get(ResourcePath::new(path).as_str())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Number of successful reads so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

fn not_found(path: &ResourcePath) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path} does not exist"))
}

impl ResourceLayer for InMemoryResources {
    fn read_bytes(&self, path: &ResourcePath, encoding: &str) -> io::Result<Vec<u8>> {
        if !encoding.eq_ignore_ascii_case("utf-8") {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported encoding {encoding}"),
            ));
        }
        let bytes = self
            .files
            .lock()
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| not_found(path))?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(bytes)
    }

    fn write_bytes(&self, path: &ResourcePath, contents: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .insert(path.as_str().to_owned(), contents.to_vec());
        Ok(())
    }

    fn delete(&self, path: &ResourcePath) -> io::Result<()> {
        match self.files.lock().remove(path.as_str()) {
            Some(_) => Ok(()),
            None => Err(not_found(path)),
        }
    }

    fn is_accessible(&self, path: &ResourcePath) -> bool {
        self.files.lock().contains_key(path.as_str())
    }

    fn list(&self, path: &ResourcePath) -> io::Result<Vec<ResourceEntry>> {
        let prefix = if path.as_str().is_empty() {
            String::new()
        } else {
            format!("{}/", path.as_str())
        };
        let files = self.files.lock();
        let mut entries = BTreeSet::new();
        for file in files.keys() {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => entries.insert(ResourceEntry {
                    name: dir.to_owned(),
                    is_dir: true,
                }),
                None => entries.insert(ResourceEntry {
                    name: rest.to_owned(),
                    is_dir: false,
                }),
            };
        }
        if entries.is_empty() {
            return Err(not_found(path));
        }
        Ok(entries.into_iter().collect())
    }
}

/// A [`CompilerFrontEnd`] for the line-oriented test language.
///
/// Indented lines belong to the most recent `class`. A line starting with
/// `!error` fails the parse with the rest of the line as message.
#[derive(Debug, Default)]
pub struct LineFrontEnd {
    opens: AtomicUsize,
    /// When set, every parse waits for the token to fire and then reports
    /// cancellation.
    block_until_cancelled: bool,
    gate: Option<Barrier>,
}

impl LineFrontEnd {
    pub fn new() -> Self {
        Self::default()
    }

    /// A front end whose parses only finish by being cancelled.
    pub fn blocking() -> Self {
        Self {
            block_until_cancelled: true,
            ..Self::default()
        }
    }

    /// A front end whose parses wait until `parties` of them are in flight,
    /// so concurrent openers all finish parsing before any installs.
    pub fn gated(parties: usize) -> Self {
        Self {
            gate: Some(Barrier::new(parties)),
            ..Self::default()
        }
    }

    /// Number of parses started so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }
}

impl CompilerFrontEnd for LineFrontEnd {
    fn open(
        &self,
        unit: &Handle,
        contents: &UnitContents,
        cancel: &CancellationToken,
    ) -> Result<OpenedUnit, ParseError> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if self.block_until_cancelled {
            while !cancel.is_cancelled() {
                std::thread::yield_now();
            }
        }
        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }
        parse_unit(unit, &contents.text)
    }
}

struct Member {
    handle: Handle,
    body: ElementBody,
}

fn words(line: &str) -> Vec<SmolStr> {
    line.split_whitespace().map(SmolStr::new).collect()
}

fn parse_unit(unit: &Handle, text: &str) -> Result<OpenedUnit, ParseError> {
    let mut imports = Vec::new();
    let mut types: Vec<Member> = Vec::new();
    let mut members: Vec<Member> = Vec::new();
    let mut initializers = 0u32;
    let mut offset = 0usize;

    for raw in text.split_inclusive('\n') {
        let range = SourceRange::new(offset, raw.trim_end_matches('\n').len());
        offset += raw.len();
        let indented = raw.starts_with(char::is_whitespace);
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if let Some(message) = line.strip_prefix("!error") {
            return Err(ParseError::Malformed {
                message: message.trim().to_owned(),
            });
        }

        let mut tokens = words(line);
        let keyword = tokens.remove(0);
        if !indented {
            match keyword.as_str() {
                "import" => imports.extend(tokens),
                "class" => {
                    let name = tokens.first().cloned().ok_or_else(|| malformed("class without name"))?;
                    let supertypes = tokens
                        .iter()
                        .skip_while(|token| token.as_str() != "extends")
                        .skip(1)
                        .cloned()
                        .collect();
                    let handle = unit.child(ElementKind::Type, name.clone());
                    if types.iter().any(|ty| ty.handle == handle) {
                        return Err(malformed(&format!("duplicate class {name}")));
                    }
                    types.push(Member {
                        handle,
                        body: ElementBody {
                            children: Vec::new(),
                            source_range: Some(range),
                            structure_known: true,
                            payload: Payload::Type {
                                modifiers: Vec::new(),
                                supertypes,
                            },
                        },
                    });
                    initializers = 0;
                }
                other => return Err(malformed(&format!("unexpected {other}"))),
            }
            continue;
        }

        let owner = types
            .last_mut()
            .ok_or_else(|| malformed("member outside a class"))?;
        let (handle, payload) = match keyword.as_str() {
            "field" => {
                let name = tokens.first().cloned().ok_or_else(|| malformed("field without name"))?;
                let type_name = tokens.get(1).cloned().unwrap_or_else(|| SmolStr::new("int"));
                let constant = tokens
                    .iter()
                    .position(|token| token.as_str() == "=")
                    .and_then(|eq| tokens.get(eq + 1).cloned());
                (
                    owner.handle.child(ElementKind::Field, name),
                    Payload::Field {
                        modifiers: Vec::new(),
                        type_name,
                        constant,
                    },
                )
            }
            "method" => {
                let name = tokens.first().cloned().ok_or_else(|| malformed("method without name"))?;
                let return_type = tokens.get(1).cloned().unwrap_or_else(|| SmolStr::new("void"));
                (
                    owner.handle.child(ElementKind::Method, name),
                    Payload::Method {
                        modifiers: Vec::new(),
                        return_type,
                        parameters: tokens.iter().skip(2).cloned().collect(),
                    },
                )
            }
            "init" | "static" => {
                initializers += 1;
                (
                    owner
                        .handle
                        .child(ElementKind::Initializer, "")
                        .with_occurrence(initializers),
                    Payload::Initializer {
                        is_static: keyword.as_str() == "static",
                    },
                )
            }
            other => return Err(malformed(&format!("unexpected member {other}"))),
        };
        if owner.body.children.contains(&handle) {
            return Err(malformed(&format!("duplicate member {}", handle.name())));
        }
        owner.body.children.push(handle.clone());
        members.push(Member {
            handle,
            body: ElementBody {
                children: Vec::new(),
                source_range: Some(range),
                structure_known: true,
                payload,
            },
        });
    }

    let body = ElementBody {
        children: types.iter().map(|ty| ty.handle.clone()).collect(),
        source_range: Some(SourceRange::new(0, text.len())),
        structure_known: true,
        payload: Payload::Unit { imports },
    };
    let members = types
        .into_iter()
        .chain(members)
        .map(|member| (member.handle, member.body))
        .collect();
    Ok(OpenedUnit { body, members })
}

fn malformed(message: &str) -> ParseError {
    ParseError::Malformed {
        message: message.to_owned(),
    }
}
