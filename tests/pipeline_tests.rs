mod common;

use common::*;
use phpci_builder::{LoadError, PipelineLoader, Stage};

#[test]
fn test_load_full_pipeline() {
    let dir = create_test_dir();
    write_file(
        dir.path(),
        "phpci.yml",
        r#"
build_settings:
  verbose: true
  ignore:
    - vendor
    - tests/fixtures
setup:
  shell:
    - "composer install"
test:
  php_unit:
    directory: tests
    allow_failures: true
  php_cpd:
    path: src
complete:
  shell:
    command: "make docs"
failure:
  shell:
    - "echo failed"
"#,
    );

    let pipeline = PipelineLoader::load_from_dir(dir.path(), "phpci.yml").unwrap();

    assert!(pipeline.build_settings.verbose);
    assert!(!pipeline.build_settings.prefer_symlink);
    assert_eq!(pipeline.build_settings.ignore, vec!["vendor", "tests/fixtures"]);
    assert_eq!(pipeline.stage(Stage::Test).names(), vec!["php_unit", "php_cpd"]);
    assert!(pipeline.stage(Stage::Success).is_empty());
    assert_eq!(pipeline.plugin_count(), 5);

    let php_unit = &pipeline.stage(Stage::Test).0[0];
    assert!(php_unit.options.allow_failures());
    assert_eq!(php_unit.options.get_str("directory").as_deref(), Some("tests"));

    let setup = &pipeline.stage(Stage::Setup).0[0];
    assert_eq!(
        setup.options.as_list(),
        Some(vec!["composer install".to_string()])
    );
}

#[test]
fn test_plugin_order_follows_file() {
    let dir = create_test_dir();
    write_file(
        dir.path(),
        "phpci.yml",
        "test:\n  zeta: {}\n  alpha: {}\n  mid: {}\n",
    );

    let pipeline = PipelineLoader::load_from_dir(dir.path(), "phpci.yml").unwrap();
    assert_eq!(pipeline.stage(Stage::Test).names(), vec!["zeta", "alpha", "mid"]);
}

#[test]
fn test_test_stage_defaults_allow_failures() {
    let dir = create_test_dir();
    write_file(dir.path(), "phpci.yml", "test:\n  php_unit: ~\nsetup:\n  grunt: ~\n");

    let pipeline = PipelineLoader::load_from_dir(dir.path(), "phpci.yml").unwrap();

    let test_options = pipeline.stage(Stage::Test).0[0].options.resolved(Stage::Test);
    assert_eq!(test_options.get_bool("allow_failures"), Some(false));

    let setup_options = pipeline.stage(Stage::Setup).0[0].options.resolved(Stage::Setup);
    assert!(!setup_options.contains("allow_failures"));
}

#[test]
fn test_missing_pipeline_file() {
    let dir = create_test_dir();
    let err = PipelineLoader::load_from_dir(dir.path(), "phpci.yml").unwrap_err();

    assert!(matches!(err, LoadError::Missing(_)));
    assert_eq!(err.to_string(), "Project does not contain a phpci.yml file.");
}

#[test]
fn test_invalid_yaml_names_the_file() {
    let dir = create_test_dir();
    let path = write_file(dir.path(), "phpci.yml", "test: [unclosed\n");

    let err = PipelineLoader::load_file(&path).unwrap_err();
    assert!(matches!(err, LoadError::Yaml { .. }));
    assert!(err.to_string().contains("phpci.yml"));
}

#[test]
fn test_empty_file_is_empty_pipeline() {
    let dir = create_test_dir();
    write_file(dir.path(), "phpci.yml", "");

    let pipeline = PipelineLoader::load_from_dir(dir.path(), "phpci.yml").unwrap();
    assert_eq!(pipeline.plugin_count(), 0);
    assert!(pipeline.build_settings.ignore.is_empty());
}
