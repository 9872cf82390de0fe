use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::model::ModelsConfig;
use crate::Config;

/// Load and validate the model configuration file at `path`.
///
/// Relative paths inside the file (`path`, `system_prompt_file`) are resolved
/// against the directory containing the config file itself, not the process's
/// current working directory.
pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(Error::ConfigOpen)?;
    let mut parsed: ModelsConfig = serde_json::from_str(&content).map_err(Error::ConfigParse)?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    for (name, entry) in parsed.models.iter_mut() {
        entry.name = name.clone();
        entry.path = resolve(base_dir, &entry.path);
        entry.system_prompt_file = resolve(base_dir, &entry.system_prompt_file);
    }

    Ok(Config { models: parsed.models })
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn write_config(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("config.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn loads_a_minimal_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.txt"), "You are helpful.").unwrap();

        let json = indoc! {r#"
            {
              "models": {
                "llama": {
                  "path": "llama.gguf",
                  "dialect": "tag-delimited",
                  "system_prompt_file": "prompt.txt",
                  "context_size": 4096
                }
              }
            }
        "#};

        let path = write_config(dir.path(), json);
        let config = load(&path).unwrap();

        let model = config.models.get("llama").unwrap();
        assert_eq!(model.name, "llama");
        assert_eq!(model.path, dir.path().join("llama.gguf"));
        assert_eq!(model.system_prompt_file, dir.path().join("prompt.txt"));
        assert_eq!(model.context_size, 4096);
        assert!(model.tool_providers.is_empty());
    }

    #[test]
    fn missing_system_prompt_file_field_fails_to_parse() {
        let dir = tempfile::tempdir().unwrap();

        let json = indoc! {r#"
            {
              "models": {
                "llama": {
                  "path": "llama.gguf",
                  "dialect": "tag-delimited",
                  "context_size": 4096
                }
              }
            }
        "#};

        let path = write_config(dir.path(), json);
        assert!(load(&path).is_err());
    }

    #[test]
    fn parses_tool_providers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.txt"), "You are helpful.").unwrap();

        let json = indoc! {r#"
            {
              "models": {
                "llama": {
                  "path": "llama.gguf",
                  "dialect": "square-bracket",
                  "system_prompt_file": "prompt.txt",
                  "context_size": 8192,
                  "tool_providers": [
                    {"transport": "stdio", "name": "fs", "command": "mcp-fs", "args": ["--root", "/tmp"]},
                    {"transport": "http", "name": "search", "url": "http://localhost:9001"}
                  ]
                }
              }
            }
        "#};

        let path = write_config(dir.path(), json);
        let config = load(&path).unwrap();
        let model = config.models.get("llama").unwrap();
        assert_eq!(model.tool_providers.len(), 2);
        assert_eq!(model.tool_providers[0].name(), "fs");
        assert_eq!(model.tool_providers[1].name(), "search");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load("/nonexistent/config.json").unwrap_err();
        assert!(err.to_string().contains("open"));
    }
}
