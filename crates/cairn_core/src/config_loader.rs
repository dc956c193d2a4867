use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use cairn_filesystem::search::search_ancestors;
use cairn_filesystem::search::AncestorSearch;
use cairn_filesystem::FileSystemRef;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::diagnostic::Diagnostic;
use crate::diagnostic::ErrorKind;
use crate::diagnostic_error;
use crate::types::ConfigContents;
use crate::types::ConfigFormat;

pub type ConfigLoaderRef = Arc<ConfigLoader>;

/// Enables config to be loaded in various formats
#[derive(Debug)]
pub struct ConfigLoader {
  pub fs: FileSystemRef,
  pub project_root: PathBuf,
}

#[derive(Debug, PartialEq)]
pub struct ConfigFile<T> {
  pub contents: T,
  pub path: PathBuf,
  pub raw: String,
}

impl ConfigLoader {
  pub fn new(fs: FileSystemRef, project_root: PathBuf) -> Self {
    Self { fs, project_root }
  }

  /// Look for the closest of `filenames` from `search_path` up to the project root
  pub fn search<F: AsRef<str>>(&self, filenames: &[F], search_path: &Path) -> AncestorSearch {
    search_ancestors(&*self.fs, filenames, search_path, &self.project_root)
  }

  /// Read a config file and parse it according to its file name
  #[tracing::instrument(level = "trace", skip(self))]
  pub fn read_config(&self, path: &Path, parse: bool) -> anyhow::Result<ConfigFile<ConfigContents>> {
    let raw = self.fs.read_to_string(path).map_err(|error| {
      diagnostic_error!(Diagnostic::new(format!(
        "Unable to read config file {}: {error}",
        path.display()
      ))
      .kind(ErrorKind::NotFound))
    })?;

    let contents = if parse {
      parse_config(path, &raw)?
    } else {
      ConfigContents::Text(raw.clone())
    };

    Ok(ConfigFile {
      contents,
      path: path.to_path_buf(),
      raw,
    })
  }

  pub fn load_json_config<Config: DeserializeOwned>(
    &self,
    filename: &str,
    search_path: &Path,
  ) -> anyhow::Result<ConfigFile<Config>> {
    let path = self.search(&[filename], search_path).found.ok_or_else(|| {
      diagnostic_error!(Diagnostic::new(format!(
        "Unable to locate {filename} config file from {}",
        search_path.display()
      ))
      .kind(ErrorKind::NotFound))
    })?;

    let code = self.fs.read_to_string(&path)?;
    let contents = serde_json::from_str::<Config>(&code)
      .map_err(|error| json_error(&path, &error))?;

    Ok(ConfigFile {
      contents,
      path,
      raw: code,
    })
  }

  pub fn load_package_json<Config: DeserializeOwned>(
    &self,
    search_path: &Path,
  ) -> anyhow::Result<ConfigFile<Config>> {
    self.load_json_config::<Config>("package.json", search_path)
  }
}

/// Parse config source text according to the format implied by its path
pub fn parse_config(path: &Path, raw: &str) -> anyhow::Result<ConfigContents> {
  let contents = match ConfigFormat::from_path(path) {
    ConfigFormat::Json => ConfigContents::Json(
      serde_json::from_str::<Value>(raw).map_err(|error| json_error(path, &error))?,
    ),
    ConfigFormat::Json5 => ConfigContents::Json5(json5::from_str::<Value>(raw).map_err(|error| {
      let json5::Error::Message { msg, location } = &error;
      let diagnostic = parse_diagnostic(path, msg);
      match location {
        Some(location) => {
          diagnostic_error!(diagnostic.location(path.to_path_buf(), location.line, location.column))
        }
        None => diagnostic_error!(diagnostic),
      }
    })?),
    ConfigFormat::Toml => ConfigContents::Toml(toml::from_str::<Value>(raw).map_err(|error| {
      let diagnostic = parse_diagnostic(path, error.message());
      match error.span() {
        Some(span) => {
          let (line, column) = line_and_column(raw, span.start);
          diagnostic_error!(diagnostic.location(path.to_path_buf(), line, column))
        }
        None => diagnostic_error!(diagnostic),
      }
    })?),
    ConfigFormat::Yaml => ConfigContents::Yaml(serde_yml::from_str::<Value>(raw).map_err(|error| {
      let diagnostic = parse_diagnostic(path, &error.to_string());
      match error.location() {
        Some(location) => diagnostic_error!(diagnostic.location(
          path.to_path_buf(),
          location.line(),
          location.column()
        )),
        None => diagnostic_error!(diagnostic),
      }
    })?),
    ConfigFormat::Script => ConfigContents::Script(path.to_path_buf()),
    ConfigFormat::Text => ConfigContents::Text(raw.to_string()),
  };

  Ok(contents)
}

fn parse_diagnostic(path: &Path, message: &str) -> Diagnostic {
  Diagnostic::new(format!("Error parsing {}: {message}", path.display()))
    .kind(ErrorKind::ParseError)
    .origin("cairn_core::config_loader")
}

fn json_error(path: &Path, error: &serde_json::Error) -> anyhow::Error {
  diagnostic_error!(parse_diagnostic(path, &error.to_string()).location(
    path.to_path_buf(),
    error.line(),
    error.column()
  ))
}

fn line_and_column(source: &str, offset: usize) -> (usize, usize) {
  let before = &source[..offset.min(source.len())];
  let line = before.matches('\n').count() + 1;
  let column = before.rfind('\n').map_or(before.len(), |index| before.len() - index - 1) + 1;
  (line, column)
}

#[cfg(test)]
mod tests {
  use cairn_filesystem::in_memory_file_system::InMemoryFileSystem;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;

  fn loader(fs: Arc<InMemoryFileSystem>) -> ConfigLoader {
    ConfigLoader::new(fs, PathBuf::from("/project-root"))
  }

  mod load_json_config {
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct JsonConfig {}

    #[test]
    fn returns_an_error_when_the_config_does_not_exist() {
      let search_path = PathBuf::from("/project-root/index");
      let config = loader(Arc::new(InMemoryFileSystem::default()));

      assert_eq!(
        config
          .load_json_config::<JsonConfig>("config.json", &search_path)
          .map_err(|err| err.to_string()),
        Err(format!(
          "Unable to locate config.json config file from {}",
          search_path.display()
        ))
      )
    }

    #[test]
    fn returns_an_error_when_the_config_is_outside_the_project_root() {
      let fs = Arc::new(InMemoryFileSystem::default());
      let search_path = PathBuf::from("/project-root/index");

      fs.write_file(Path::new("/config.json"), String::from("{}"));

      assert_eq!(
        loader(fs)
          .load_json_config::<JsonConfig>("config.json", &search_path)
          .map_err(|err| err.to_string()),
        Err(format!(
          "Unable to locate config.json config file from {}",
          search_path.display()
        ))
      )
    }

    #[test]
    fn returns_json_config_at_project_root() {
      let fs = Arc::new(InMemoryFileSystem::default());
      let config_path = PathBuf::from("/project-root/config.json");

      fs.write_file(&config_path, String::from("{}"));

      assert_eq!(
        loader(fs)
          .load_json_config::<JsonConfig>("config.json", Path::new("/project-root/index"))
          .map_err(|err| err.to_string()),
        Ok(ConfigFile {
          path: config_path,
          contents: JsonConfig {},
          raw: String::from("{}")
        })
      )
    }

    #[test]
    fn returns_an_error_when_package_json_has_trailing_comma() {
      let fs = Arc::new(InMemoryFileSystem::default());
      let package_path = PathBuf::from("/project-root/package.json");

      fs.write_file(&package_path, String::from(r#"{"name": "test",}"#));

      assert_eq!(
        loader(fs)
          .load_package_json::<Value>(Path::new("/project-root"))
          .map_err(|err| err.to_string()),
        Err(format!(
          "Error parsing {}: trailing comma at line 1 column 17",
          package_path.display()
        ))
      )
    }
  }

  mod read_config {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_each_format_into_its_variant() -> anyhow::Result<()> {
      let fs = Arc::new(InMemoryFileSystem::default());
      fs.write_file(Path::new("/project-root/a.json"), String::from(r#"{"a": 1}"#));
      fs.write_file(
        Path::new("/project-root/.arc"),
        String::from("{ a: 1, // comment\n}"),
      );
      fs.write_file(Path::new("/project-root/a.toml"), String::from("a = 1"));
      fs.write_file(Path::new("/project-root/a.yaml"), String::from("a: 1"));
      fs.write_file(
        Path::new("/project-root/a.config.js"),
        String::from("module.exports = {}"),
      );

      let config = loader(fs);
      let read = |path: &str| config.read_config(Path::new(path), true).map(|c| c.contents);

      assert_eq!(read("/project-root/a.json")?, ConfigContents::Json(json!({"a": 1})));
      assert_eq!(read("/project-root/.arc")?, ConfigContents::Json5(json!({"a": 1})));
      assert_eq!(read("/project-root/a.toml")?, ConfigContents::Toml(json!({"a": 1})));
      assert_eq!(read("/project-root/a.yaml")?, ConfigContents::Yaml(json!({"a": 1})));
      assert_eq!(
        read("/project-root/a.config.js")?,
        ConfigContents::Script(PathBuf::from("/project-root/a.config.js"))
      );

      Ok(())
    }

    #[test]
    fn returns_raw_text_when_parsing_is_disabled() -> anyhow::Result<()> {
      let fs = Arc::new(InMemoryFileSystem::default());
      fs.write_file(Path::new("/project-root/a.json"), String::from("{not json"));

      let file = loader(fs).read_config(Path::new("/project-root/a.json"), false)?;

      assert_eq!(file.contents, ConfigContents::Text(String::from("{not json")));
      Ok(())
    }

    #[test]
    fn reports_parse_errors_with_a_location() {
      let fs = Arc::new(InMemoryFileSystem::default());
      fs.write_file(
        Path::new("/project-root/a.toml"),
        String::from("a = 1\nb = "),
      );

      let error = loader(fs)
        .read_config(Path::new("/project-root/a.toml"), true)
        .unwrap_err();
      let diagnostic = error.downcast_ref::<Diagnostic>().unwrap();

      assert_eq!(diagnostic.kind, ErrorKind::ParseError);
      assert_eq!(diagnostic.location.as_ref().map(|l| l.line), Some(2));
    }
  }

  #[test]
  fn line_and_column_are_one_based() {
    assert_eq!(line_and_column("ab\ncd", 0), (1, 1));
    assert_eq!(line_and_column("ab\ncd", 4), (2, 2));
  }
}
