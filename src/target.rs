use std::{env, fmt};

pub const EMIT_MODE_ENV: &str = "KEEL_EMIT_MODE";
pub const DEFAULT_ENTRY_FUNCTION: &str = "main";

/// What the generated `main` does with the entry function's result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmitMode {
    /// Print the result and exit with status 0.
    #[default]
    Program,
    /// Print nothing; the result becomes the exit status.
    Tool,
}

impl EmitMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "program" => Some(EmitMode::Program),
            "tool" => Some(EmitMode::Tool),
            _ => None,
        }
    }

    pub fn from_flag_or_env(flag: Option<String>) -> Result<Self, String> {
        resolve_mode(flag, env::var(EMIT_MODE_ENV).ok())
    }
}

impl fmt::Display for EmitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitMode::Program => f.write_str("program"),
            EmitMode::Tool => f.write_str("tool"),
        }
    }
}

fn resolve_mode(flag: Option<String>, env_value: Option<String>) -> Result<EmitMode, String> {
    match flag.or(env_value).filter(|value| !value.trim().is_empty()) {
        Some(value) => EmitMode::parse(&value).ok_or_else(|| {
            format!("unknown emit mode `{value}` (expected `program` or `tool`)")
        }),
        None => Ok(EmitMode::default()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOptions {
    pub mode: EmitMode,
    /// Package whose root module holds the entry function. Without one the
    /// build produces a library and no C `main`.
    pub entry_package: Option<String>,
    pub entry_function: String,
}

impl BuildOptions {
    pub fn from_sources(mode_flag: Option<String>, entry_package: Option<String>) -> Result<Self, String> {
        Ok(Self {
            mode: EmitMode::from_flag_or_env(mode_flag)?,
            entry_package: entry_package.filter(|package| !package.trim().is_empty()),
            entry_function: DEFAULT_ENTRY_FUNCTION.to_string(),
        })
    }

    pub fn program(entry_package: impl Into<String>) -> Self {
        Self {
            entry_package: Some(entry_package.into()),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: EmitMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            mode: EmitMode::default(),
            entry_package: None,
            entry_function: DEFAULT_ENTRY_FUNCTION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_mode_prefers_the_flag() {
        assert_eq!(
            resolve_mode(Some("tool".into()), Some("program".into())),
            Ok(EmitMode::Tool)
        );
        assert_eq!(resolve_mode(None, Some(" Tool ".into())), Ok(EmitMode::Tool));
        assert_eq!(resolve_mode(None, None), Ok(EmitMode::Program));
        assert_eq!(resolve_mode(None, Some(String::new())), Ok(EmitMode::Program));
    }

    #[test]
    fn unknown_emit_modes_are_rejected() {
        let error = resolve_mode(Some("library".into()), None).unwrap_err();
        assert!(error.contains("unknown emit mode `library`"));
    }

    #[test]
    fn program_options_name_the_entry_package() {
        let options = BuildOptions::program("app").with_mode(EmitMode::Tool);
        assert_eq!(options.entry_package.as_deref(), Some("app"));
        assert_eq!(options.entry_function, "main");
        assert_eq!(options.mode, EmitMode::Tool);
    }
}
