use crate::languages::LanguageExecutor;

pub struct JavaScriptExecutor {
    node_version: String,
}

impl JavaScriptExecutor {
    pub fn new(version: Option<String>) -> Self {
        Self {
            node_version: version.unwrap_or_else(|| "20".to_string()),
        }
    }
}

impl LanguageExecutor for JavaScriptExecutor {
    fn image(&self) -> String {
        format!("node:{}", self.node_version)
    }

    fn source_file(&self) -> &str {
        "main.js"
    }

    // Interpreted, nothing to build
    fn run_script(&self) -> String {
        "node main.js".to_string()
    }
}
