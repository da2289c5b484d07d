//! The process-wide instance can only be installed once, so everything about it lives in a single
//! test.

use logconf::*;
use serde_json::json;

#[derive(Default)]
struct App {
    root: Option<Logger>,
    api: Option<&'static LogConfigurator>,
}

impl Host for App {
    fn install_logging(&mut self, root: Logger, api: &'static LogConfigurator) {
        self.root = Some(root);
        self.api = Some(api);
    }
}

#[test]
fn install_once() {
    assert!(instance().is_none());

    let path = std::env::temp_dir().join(format!("logconf-install-{}.log", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let options = PartialConfiguration::default()
        .with_appender("file", json!({ "type": "file", "filename": path }))
        .with_category(
            DEFAULT_CATEGORY,
            Category {
                level: Level::Warn,
                appenders: vec![String::from("file")],
            },
        );

    let mut app = App::default();
    let api = install(&mut app, Some(&options)).unwrap();

    assert!(std::ptr::eq(api, instance().unwrap()));
    assert!(std::ptr::eq(api, app.api.unwrap()));
    assert_eq!(app.root.as_ref().unwrap().category(), DEFAULT_CATEGORY);

    let config = api.configuration();
    assert!(config.disable_clustering);
    assert_eq!(config.categories[DEFAULT_CATEGORY].level, Level::Warn);

    // Only the install lines at or above `WARN` made it to the file
    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = contents.lines().collect();
    assert_eq!(lines.len(), 4, "{contents}");
    assert!(lines[0].ends_with("[WARN] default - logconf: install() WARN messages enabled"));
    assert!(lines[3].ends_with("[MARK] default - logconf: install() MARK messages enabled"));

    let db = api
        .register_category("db", Some(Level::Info), None)
        .unwrap();
    assert_eq!(db.level(), Level::Info);
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("[INFO] db - Category logger registered! db"));

    let mut other = App::default();
    assert!(matches!(
        install(&mut other, None),
        Err(InstallError::AlreadyInstalled)
    ));
    assert!(other.api.is_none());

    let _ = std::fs::remove_file(&path);
}
