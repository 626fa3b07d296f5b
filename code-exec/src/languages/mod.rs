//! Language-specific executor implementations

mod c;
mod cpp;
mod javascript;

pub use c::CExecutor;
pub use cpp::CppExecutor;
pub use javascript::JavaScriptExecutor;

use crate::{
    sandbox::{encode_source, ContainerSpec, SOURCE_ENV},
    types::{Language, ResourceLimits},
};

/// Directory inside the container where the source is written and built.
pub const WORK_DIR: &str = "/tmp";

/// How one language is built and run inside a container.
///
/// The container command is a fixed script: the source arrives base64-encoded
/// in an environment variable and is decoded into [`source_file`]. User code
/// never becomes part of the command line.
///
/// [`source_file`]: LanguageExecutor::source_file
pub trait LanguageExecutor: Send + Sync {
    /// Image the container is created from
    fn image(&self) -> String;

    /// File name the source is decoded into
    fn source_file(&self) -> &str;

    /// Shell steps that build (if needed) and run `source_file`
    fn run_script(&self) -> String;

    fn command(&self) -> Vec<String> {
        let script = format!(
            "printf '%s' \"${}\" | base64 -d > {} && {}",
            SOURCE_ENV,
            self.source_file(),
            self.run_script()
        );
        vec!["sh".to_string(), "-c".to_string(), script]
    }

    fn container_spec(&self, name: String, code: &str, limits: &ResourceLimits) -> ContainerSpec {
        ContainerSpec {
            name,
            image: self.image(),
            command: self.command(),
            env: vec![encode_source(code)],
            working_dir: WORK_DIR.to_string(),
            limits: limits.clone(),
        }
    }
}

/// Default executor for each supported language.
pub fn executor_for(language: Language) -> Box<dyn LanguageExecutor> {
    match language {
        Language::C => Box::new(CExecutor::new(None)),
        Language::Cpp => Box::new(CppExecutor::new(None, None)),
        Language::Js => Box::new(JavaScriptExecutor::new(None)),
    }
}
