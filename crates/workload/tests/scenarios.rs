//! Every bundled scenario must load and validate.

use std::path::Path;

use traffic_workload::ScenarioConfig;

#[test]
fn test_bundled_scenarios_validate() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
    let mut checked = 0;

    for entry in std::fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().map_or(false, |ext| ext == "yaml") {
            let config = ScenarioConfig::from_file(&path)
                .unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
            config
                .validate()
                .unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
            config.to_options().unwrap();
            checked += 1;
        }
    }

    assert!(checked >= 2);
}
