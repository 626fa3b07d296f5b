use crate::languages::LanguageExecutor;

pub struct CppExecutor {
    std_version: String,
    gcc_version: String,
}

impl CppExecutor {
    pub fn new(std_version: Option<String>, gcc_version: Option<String>) -> Self {
        Self {
            std_version: std_version.unwrap_or_else(|| "17".to_string()),
            gcc_version: gcc_version.unwrap_or_else(|| "13".to_string()),
        }
    }
}

impl LanguageExecutor for CppExecutor {
    fn image(&self) -> String {
        format!("gcc:{}", self.gcc_version)
    }

    fn source_file(&self) -> &str {
        "main.cpp"
    }

    fn run_script(&self) -> String {
        format!(
            "g++ -std=c++{} -O2 -o main main.cpp && ./main",
            self.std_version
        )
    }
}
