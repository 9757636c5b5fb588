//! Resolved runtime filesystem layout under `~/.url-check`.

use std::path::PathBuf;

/// Resolved runtime paths for one process: state store, alert logs, and
/// the two config files.
#[derive(Debug, Clone)]
pub struct UrlcheckPaths {
    /// Runtime root directory (`~/.url-check`).
    pub root: PathBuf,
    /// `conf/tasks.yaml`.
    pub tasks_yaml: PathBuf,
    /// `conf/alerts.yaml`.
    pub alerts_yaml: PathBuf,
    /// Per-task state file directory.
    pub data_dir: PathBuf,
    /// Alert log directory.
    pub logs_dir: PathBuf,
}

/// Resolve the default config directory (`~/.url-check/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".url-check"))
}

/// Resolve runtime paths under `~/.url-check`, optionally rooted elsewhere
/// for tests or containerized deployments.
///
/// # Errors
///
/// Returns an error when `root` is `None` and the home directory cannot be
/// determined.
pub fn runtime_paths(root: Option<PathBuf>) -> anyhow::Result<UrlcheckPaths> {
    let root = match root {
        Some(root) => root,
        None => config_dir()?,
    };
    let conf_dir = root.join("conf");

    Ok(UrlcheckPaths {
        tasks_yaml: conf_dir.join("tasks.yaml"),
        alerts_yaml: conf_dir.join("alerts.yaml"),
        data_dir: root.join("data"),
        logs_dir: root.join("logs"),
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_paths_nests_under_given_root() {
        let paths = runtime_paths(Some(PathBuf::from("/tmp/example"))).unwrap();
        assert_eq!(paths.tasks_yaml, PathBuf::from("/tmp/example/conf/tasks.yaml"));
        assert_eq!(paths.alerts_yaml, PathBuf::from("/tmp/example/conf/alerts.yaml"));
        assert_eq!(paths.data_dir, PathBuf::from("/tmp/example/data"));
        assert_eq!(paths.logs_dir, PathBuf::from("/tmp/example/logs"));
    }
}
