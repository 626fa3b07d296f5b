use crate::languages::LanguageExecutor;

pub struct CExecutor {
    gcc_version: String,
}

impl CExecutor {
    pub fn new(gcc_version: Option<String>) -> Self {
        Self {
            gcc_version: gcc_version.unwrap_or_else(|| "13".to_string()),
        }
    }
}

impl LanguageExecutor for CExecutor {
    fn image(&self) -> String {
        format!("gcc:{}", self.gcc_version)
    }

    fn source_file(&self) -> &str {
        "main.c"
    }

    fn run_script(&self) -> String {
        "gcc -std=c17 -O2 -o main main.c -lm && ./main".to_string()
    }
}
