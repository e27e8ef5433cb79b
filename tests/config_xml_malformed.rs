use std::fs;
use tempfile::tempdir;

use sluice::config::load_config;

#[test]
fn truncated_xml_is_rejected() {
    let td = tempdir().unwrap();
    let path = td.path().join("config.xml");
    fs::write(&path, "<config><watch_dir>/in</watch_dir>").unwrap();
    assert!(load_config(&path).is_err());
}

#[test]
fn unknown_element_is_rejected() {
    let td = tempdir().unwrap();
    let path = td.path().join("config.xml");
    fs::write(&path, "<config><surprise>1</surprise></config>").unwrap();
    assert!(load_config(&path).is_err());
}

#[test]
fn bad_rule_pattern_fails_at_load_not_at_match() {
    let td = tempdir().unwrap();
    let path = td.path().join("config.xml");
    fs::write(
        &path,
        r#"<config>
  <rule><name>broken</name><pattern>([unclosed</pattern><target>/out</target></rule>
</config>"#,
    )
    .unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken"), "error names the rule");
}

#[test]
fn malformed_template_fails_at_load() {
    let td = tempdir().unwrap();
    let path = td.path().join("config.xml");
    fs::write(
        &path,
        r#"<config>
  <rule><name>t</name><target>/out/$yyyy</target></rule>
</config>"#,
    )
    .unwrap();
    assert!(load_config(&path).is_err());
}
