//! Synthesizes the shim module that runs injected setup code before the
//! user's handler.
//!
//! The generated module name and export are fixed, so wrapping the same
//! inputs twice writes byte-identical output and yields the same handler
//! reference.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{DeployError, Result};

pub const WRAPPER_MODULE_NAME: &str = "server-index";
pub const WRAPPER_EXPORT_NAME: &str = "handler";
pub const WRAPPER_MODULE_EXTENSION: &str = "mjs";
pub const LINKS_GLOBAL: &str = "globalThis.$FN_LINKS";

const HANDLER_MODULE_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InjectionSpec {
    #[serde(default)]
    pub injections: Vec<String>,
    #[serde(default)]
    pub binding: Option<String>,
    #[serde(default)]
    pub streaming: bool,
}

impl InjectionSpec {
    pub fn is_empty(&self) -> bool {
        self.injections.is_empty() && self.binding.is_none()
    }

    fn validate(&self) -> Result<()> {
        if let Some(index) = self
            .injections
            .iter()
            .position(|snippet| snippet.trim().is_empty())
        {
            return Err(DeployError::configuration(format!(
                "injection #{index} is empty"
            )));
        }
        if matches!(&self.binding, Some(binding) if binding.trim().is_empty()) {
            return Err(DeployError::configuration("binding snippet is empty"));
        }
        Ok(())
    }
}

/// Handler reference of the form `<dir>/<module>.<export>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WrappedHandler {
    pub entry_module_path: String,
    pub exported_symbol: String,
}

impl WrappedHandler {
    pub fn handler_reference(&self) -> String {
        format!("{}.{}", self.entry_module_path, self.exported_symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HandlerParts<'a> {
    entry: &'a str,
    directory: &'a str,
    module: &'a str,
    export: &'a str,
}

fn parse_handler(handler: &str) -> Result<HandlerParts<'_>> {
    let (directory, file) = match handler.rsplit_once('/') {
        Some((directory, file)) => (directory, file),
        None => ("", handler),
    };
    let Some((module, export)) = file.rsplit_once('.') else {
        return Err(DeployError::configuration(format!(
            "handler '{handler}' must have the form <path>/<module>.<export>"
        )));
    };
    if module.is_empty() || export.is_empty() {
        return Err(DeployError::configuration(format!(
            "handler '{handler}' has an empty module or export name"
        )));
    }
    let entry = &handler[..handler.len() - export.len() - 1];
    Ok(HandlerParts {
        entry,
        directory,
        module,
        export,
    })
}

impl HandlerParts<'_> {
    fn wrapped(&self) -> WrappedHandler {
        WrappedHandler {
            entry_module_path: join_posix(self.directory, WRAPPER_MODULE_NAME),
            exported_symbol: WRAPPER_EXPORT_NAME.to_string(),
        }
    }

    fn original(&self) -> WrappedHandler {
        WrappedHandler {
            entry_module_path: self.entry.to_string(),
            exported_symbol: self.export.to_string(),
        }
    }
}

fn join_posix(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_string()
    } else {
        format!("{directory}/{name}")
    }
}

/// Wraps `handler` so every injection runs before it.
///
/// An empty spec returns the original handler untouched and writes nothing.
pub fn wrap_handler(
    handler: &str,
    output_directory: &Path,
    spec: &InjectionSpec,
) -> Result<WrappedHandler> {
    let parts = parse_handler(handler)?;
    spec.validate()?;

    if spec.is_empty() {
        return Ok(parts.original());
    }

    let handler_dir = output_directory.join(parts.directory);
    let extension = locate_handler_module(&handler_dir, parts.module)?;
    let source = render_wrapper(&parts, extension, spec);

    let wrapper_path =
        handler_dir.join(format!("{WRAPPER_MODULE_NAME}.{WRAPPER_MODULE_EXTENSION}"));
    fs::write(&wrapper_path, source)
        .map_err(|error| DeployError::io("writing handler wrapper", &wrapper_path, error))?;

    let wrapped = parts.wrapped();
    debug!(
        component = "handler_wrapper",
        original = handler,
        wrapped = %wrapped.handler_reference(),
        injections = spec.injections.len(),
        streaming = spec.streaming,
        "wrote handler wrapper"
    );
    Ok(wrapped)
}

fn locate_handler_module(handler_dir: &Path, module: &str) -> Result<&'static str> {
    HANDLER_MODULE_EXTENSIONS
        .iter()
        .copied()
        .find(|extension| handler_dir.join(format!("{module}.{extension}")).is_file())
        .ok_or_else(|| {
            DeployError::configuration(format!(
                "could not find handler module '{module}' (.js, .mjs or .cjs) in {}",
                handler_dir.display()
            ))
        })
}

fn render_wrapper(parts: &HandlerParts<'_>, extension: &str, spec: &InjectionSpec) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(binding) = &spec.binding {
        lines.push(binding.clone());
    }

    let (signature, arguments, closing) = if spec.streaming {
        (
            format!(
                "export const {WRAPPER_EXPORT_NAME} = awslambda.streamifyResponse(async (event, responseStream, context) => {{"
            ),
            "event, responseStream, context",
            "});",
        )
    } else {
        (
            format!("export const {WRAPPER_EXPORT_NAME} = async (event, context) => {{"),
            "event, context",
            "};",
        )
    };

    lines.push(signature);
    // Snippets go in as written; re-indenting would alter multi-line literals.
    lines.extend(spec.injections.iter().cloned());
    lines.push(format!(
        "  const {{ {}: rawHandler }} = await import(\"./{}.{extension}\");",
        parts.export, parts.module
    ));
    lines.push(format!("  return rawHandler({arguments});"));
    lines.push(closing.to_string());

    let mut source = lines.join("\n");
    source.push('\n');
    source
}

/// Serializes linked resource properties into a module-load side effect.
pub fn link_binding_snippet(links: &BTreeMap<String, Value>) -> Option<String> {
    if links.is_empty() {
        return None;
    }
    // BTreeMap keeps key order stable, so the package digest is stable too.
    let payload = serde_json::to_string(links).ok()?;
    Some(format!("{LINKS_GLOBAL} = {payload};"))
}
