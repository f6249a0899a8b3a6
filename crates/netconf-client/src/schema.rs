// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! YANG schema context: the set of modules a session knows about, how
//! they are located, and which of their features are enabled.
//!
//! Modules are located in this order: already loaded in memory, the
//! pluggable [SchemaSource] resolver (the `<get-schema>` callback during
//! session bring-up), the on-disk search path, and finally the built-in
//! bootstrap descriptors of the IETF modules the client itself depends
//! on.

use std::{
    collections::{BTreeSet, HashMap},
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Debug, strum_macros::Display)]
pub enum SchemaError {
    #[strum(to_string = "module `{module}` not found in the schema context")]
    ModuleNotFound { module: String },

    #[strum(to_string = "validation failed: {0}")]
    Validation(String),

    #[strum(to_string = "schema I/O error: `{0}`")]
    Io(io::Error),
}

impl std::error::Error for SchemaError {}

impl From<io::Error> for SchemaError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Schema language a module source is written in.
#[derive(
    Eq, PartialEq, Debug, Copy, Clone, strum_macros::Display, strum_macros::EnumString,
)]
pub enum ModuleFormat {
    #[strum(serialize = "yang")]
    Yang,

    #[strum(serialize = "yin")]
    Yin,
}

/// A module source text handed back by a [SchemaSource].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    pub source: Box<str>,
    pub format: ModuleFormat,
}

/// Pluggable module retrieval callback. During session bring-up the
/// session installs an implementation that issues `<get-schema>` over the
/// session being built; applications may install their own.
pub trait SchemaSource: Send + Sync {
    fn fetch(&self, name: &str, revision: Option<&str>) -> Option<ModuleSource>;
}

/// A loaded YANG module.
#[derive(Debug, Clone)]
pub struct Module {
    name: Box<str>,
    revision: Option<Box<str>>,
    namespace: Option<Box<str>>,
    source: Box<str>,
    format: ModuleFormat,
    enabled_features: BTreeSet<Box<str>>,
}

impl Module {
    pub fn new(
        name: impl Into<Box<str>>,
        revision: Option<Box<str>>,
        namespace: Option<Box<str>>,
        source: Box<str>,
        format: ModuleFormat,
    ) -> Self {
        Self {
            name: name.into(),
            revision,
            namespace,
            source,
            format,
            enabled_features: BTreeSet::new(),
        }
    }

    pub const fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub const fn source(&self) -> &str {
        &self.source
    }

    pub const fn format(&self) -> ModuleFormat {
        self.format
    }

    pub fn feature_enabled(&self, feature: &str) -> bool {
        self.enabled_features.contains(feature)
    }

    pub fn enabled_features(&self) -> impl Iterator<Item = &str> {
        self.enabled_features.iter().map(|f| f.as_ref())
    }
}

/// Bootstrap descriptors for the modules the client itself needs to
/// build RPCs, used when neither the resolver nor the search path can
/// produce them.
fn builtin_module(name: &str) -> Option<Module> {
    let (revision, namespace): (&str, &str) = match name {
        "ietf-netconf" => ("2011-06-01", "urn:ietf:params:xml:ns:netconf:base:1.0"),
        "ietf-netconf-monitoring" => (
            "2010-10-04",
            "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring",
        ),
        "notifications" => ("2008-07-14", "urn:ietf:params:xml:ns:netconf:notification:1.0"),
        "nc-notifications" => ("2008-07-14", "urn:ietf:params:xml:ns:netmod:notification"),
        "ietf-netconf-with-defaults" => (
            "2011-06-01",
            "urn:ietf:params:xml:ns:yang:ietf-netconf-with-defaults",
        ),
        _ => return None,
    };
    Some(Module::new(
        name,
        Some(revision.into()),
        Some(namespace.into()),
        "".into(),
        ModuleFormat::Yang,
    ))
}

/// Extract the names of modules imported by a YANG source. A trimmed
/// token scanner: strings and comments are skipped, `import <name>` pairs
/// are collected.
fn extract_yang_imports(source: &str) -> Vec<Box<str>> {
    fn flush<'a>(tokens: &mut Vec<&'a str>, source: &'a str, start: Option<usize>, end: usize) {
        if let Some(start) = start {
            if start < end {
                tokens.push(&source[start..end]);
            }
        }
    }

    let mut imports = Vec::new();
    let mut chars = source.char_indices().peekable();
    let mut tokens: Vec<&str> = Vec::new();
    let mut token_start: Option<usize> = None;

    while let Some((idx, c)) = chars.next() {
        match c {
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                flush(&mut tokens, source, token_start.take(), idx);
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                flush(&mut tokens, source, token_start.take(), idx);
                let mut prev = ' ';
                for (_, c) in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '"' | '\'' => {
                flush(&mut tokens, source, token_start.take(), idx);
                let quote = c;
                let mut escaped = false;
                for (_, c) in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == quote {
                        break;
                    }
                }
            }
            c if c.is_whitespace() || c == '{' || c == '}' || c == ';' => {
                flush(&mut tokens, source, token_start.take(), idx);
            }
            _ => {
                if token_start.is_none() {
                    token_start = Some(idx);
                }
            }
        }
    }
    flush(&mut tokens, source, token_start.take(), source.len());

    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        if *token == "import" {
            if let Some(name) = iter.next() {
                imports.push((*name).into());
            }
        }
    }
    imports
}

/// Extract imported module names from a YIN source by scanning for
/// `<import module="...">` elements.
fn extract_yin_imports(source: &str) -> Vec<Box<str>> {
    let mut imports = Vec::new();
    let mut rest = source;
    while let Some(pos) = rest.find("<import") {
        rest = &rest[pos + "<import".len()..];
        if let Some(module_pos) = rest.find("module=\"") {
            let after = &rest[module_pos + "module=\"".len()..];
            if let Some(end) = after.find('"') {
                imports.push(after[..end].into());
                rest = &after[end..];
            }
        }
    }
    imports
}

/// Extract the `namespace` statement value from a YANG source.
fn extract_yang_namespace(source: &str) -> Option<Box<str>> {
    let pos = source.find("namespace")?;
    let rest = &source[pos + "namespace".len()..];
    let quote_start = rest.find(['"', '\''])?;
    let quote = rest.as_bytes()[quote_start] as char;
    let after = &rest[quote_start + 1..];
    let end = after.find(quote)?;
    Some(after[..end].into())
}

enum LocatedModule {
    Fetched(ModuleSource),
    Builtin(Module),
}

/// Holds the YANG modules known to one or more sessions.
pub struct SchemaContext {
    search_path: Option<PathBuf>,
    modules: HashMap<Box<str>, Module>,
    resolver: Option<Arc<dyn SchemaSource>>,
}

impl fmt::Debug for SchemaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaContext")
            .field("search_path", &self.search_path)
            .field("modules", &self.modules.keys())
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl SchemaContext {
    pub fn new(search_path: Option<PathBuf>) -> Self {
        Self {
            search_path,
            modules: HashMap::new(),
            resolver: None,
        }
    }

    pub fn search_path(&self) -> Option<&Path> {
        self.search_path.as_deref()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn get_module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(|k| k.as_ref())
    }

    pub fn insert_module(&mut self, module: Module) {
        self.modules.insert(module.name.clone(), module);
    }

    /// Install a module resolver, returning the previously installed one
    /// so it can be restored (the capability loader swaps resolvers to
    /// retry failed loads through a different source).
    pub fn set_resolver(
        &mut self,
        resolver: Option<Arc<dyn SchemaSource>>,
    ) -> Option<Arc<dyn SchemaSource>> {
        std::mem::replace(&mut self.resolver, resolver)
    }

    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    pub fn enable_feature(&mut self, module: &str, feature: &str) -> Result<(), SchemaError> {
        match self.modules.get_mut(module) {
            Some(module) => {
                tracing::debug!("enabling feature `{feature}` on module `{}`", module.name);
                module.enabled_features.insert(feature.into());
                Ok(())
            }
            None => Err(SchemaError::ModuleNotFound {
                module: module.to_string(),
            }),
        }
    }

    pub fn feature_enabled(&self, module: &str, feature: &str) -> bool {
        self.modules
            .get(module)
            .map(|m| m.feature_enabled(feature))
            .unwrap_or(false)
    }

    /// Load one of the built-in bootstrap modules directly, bypassing the
    /// resolver and the search path.
    pub fn load_builtin(&mut self, name: &str) -> Result<(), SchemaError> {
        if self.modules.contains_key(name) {
            return Ok(());
        }
        match builtin_module(name) {
            Some(module) => {
                self.modules.insert(module.name.clone(), module);
                Ok(())
            }
            None => Err(SchemaError::ModuleNotFound {
                module: name.to_string(),
            }),
        }
    }

    /// Look up or load a module by name and optional revision. Loaded
    /// module imports are resolved through the same source chain;
    /// an import that cannot be found is a warning, not a failure.
    pub fn load_module(&mut self, name: &str, revision: Option<&str>) -> Result<(), SchemaError> {
        if self.modules.contains_key(name) {
            return Ok(());
        }
        let located = self.locate_module(name, revision).ok_or_else(|| {
            SchemaError::ModuleNotFound {
                module: name.to_string(),
            }
        })?;
        let (module, imports) = match located {
            LocatedModule::Builtin(module) => (module, Vec::new()),
            LocatedModule::Fetched(fetched) => {
                let imports = match fetched.format {
                    ModuleFormat::Yang => extract_yang_imports(&fetched.source),
                    ModuleFormat::Yin => extract_yin_imports(&fetched.source),
                };
                let namespace = match fetched.format {
                    ModuleFormat::Yang => extract_yang_namespace(&fetched.source),
                    ModuleFormat::Yin => None,
                };
                (
                    Module::new(
                        name,
                        revision.map(|r| r.into()),
                        namespace,
                        fetched.source,
                        fetched.format,
                    ),
                    imports,
                )
            }
        };
        self.modules.insert(module.name.clone(), module);
        for import in imports {
            if self.modules.contains_key(import.as_ref()) {
                continue;
            }
            if let Err(err) = self.load_module(&import, None) {
                tracing::warn!("failed to load module `{import}` imported by `{name}`: {err}");
            }
        }
        Ok(())
    }

    fn locate_module(&self, name: &str, revision: Option<&str>) -> Option<LocatedModule> {
        if let Some(resolver) = &self.resolver {
            if let Some(fetched) = resolver.fetch(name, revision) {
                tracing::debug!("module `{name}` retrieved through the installed resolver");
                return Some(LocatedModule::Fetched(fetched));
            }
        }
        if let Some(fetched) = self.probe_search_path(name, revision) {
            return Some(LocatedModule::Fetched(fetched));
        }
        builtin_module(name).map(LocatedModule::Builtin)
    }

    /// Probe the search path for `name@revision` first, then for the
    /// revision-less file, in both schema formats.
    fn probe_search_path(&self, name: &str, revision: Option<&str>) -> Option<ModuleSource> {
        let search_path = self.search_path.as_ref()?;
        let mut candidates = Vec::with_capacity(4);
        if let Some(revision) = revision {
            candidates.push((format!("{name}@{revision}.yang"), ModuleFormat::Yang));
            candidates.push((format!("{name}@{revision}.yin"), ModuleFormat::Yin));
        }
        candidates.push((format!("{name}.yang"), ModuleFormat::Yang));
        candidates.push((format!("{name}.yin"), ModuleFormat::Yin));
        for (filename, format) in candidates {
            let schema_path = search_path.join(&filename);
            tracing::debug!("probing yang schema {name} at {schema_path:?}");
            if schema_path.exists() {
                match fs::read_to_string(&schema_path) {
                    Ok(source) => {
                        return Some(ModuleSource {
                            source: source.into_boxed_str(),
                            format,
                        })
                    }
                    Err(err) => {
                        tracing::warn!("failed to read schema file {schema_path:?}: {err}");
                    }
                }
            }
        }
        None
    }
}
