// Copyright 2025 Cornell University
// released under MIT License

use anyhow::Context;
use log::{debug, info};
use std::fs;
use std::path::Path;

use crate::collection::ProcessCollection;
use crate::config::GeneratorConfig;
use crate::description::CollectionDescription;
use crate::diagnostic::DiagnosticHandler;
use crate::factory::ModelFactory;

/// Reads, decodes and validates a process collection description.
/// Errors inside process expressions are rendered to stderr.
pub fn load_collection(path: &Path) -> anyhow::Result<ProcessCollection> {
    let description = CollectionDescription::load(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let collection = match description.decode() {
        Ok(collection) => collection,
        Err(error) => {
            if let Ok(rendered) = DiagnosticHandler::new().render_decode_error(&error) {
                eprint!("{rendered}");
            }
            return Err(error).with_context(|| format!("failed to decode {}", path.display()));
        }
    };
    collection
        .validate()
        .with_context(|| format!("invalid process collection {}", path.display()))?;
    Ok(collection)
}

/// Default settings unless a configuration file is given
pub fn load_config(path: Option<&Path>) -> anyhow::Result<GeneratorConfig> {
    match path {
        Some(path) => GeneratorConfig::load(path)
            .with_context(|| format!("failed to read configuration {}", path.display())),
        None => Ok(GeneratorConfig::default()),
    }
}

/// File name of the `index`-th generated model
pub fn output_name(index: usize, model: &ProcessCollection) -> String {
    let stem: String = model
        .name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '+' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    format!("{index}_{stem}.json")
}

/// Generates the models of `model` and writes each one to `output` as soon
/// as it is produced. Returns the number of models.
pub fn generate(
    model: &ProcessCollection,
    config: &GeneratorConfig,
    output: &Path,
) -> anyhow::Result<usize> {
    fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let factory = ModelFactory::new(model, config);
    let scenarios = factory.scenarios()?;
    for (key, extracted) in &scenarios {
        info!("{key}: {} scenarios", extracted.len());
    }

    let mut count = 0;
    for variant in factory.models(&scenarios) {
        let variant = variant?;
        let path = output.join(output_name(count, &variant));
        let json = CollectionDescription::encode(&variant).to_json()?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        debug!("wrote {}", path.display());
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/collections")
            .join(name)
    }

    fn written(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn default_generation() {
        let model = load_collection(&fixture("drivers.json")).unwrap();
        let config = load_config(None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let count = generate(&model, &config, dir.path()).unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            written(dir.path()),
            vec![
                "0_c_a_base+c_b_base+entry_point_main_base.json",
                "1_c_a_sa+c_b_base+entry_point_main_base.json",
                "2_c_a_base+c_b_sb+entry_point_main_base.json",
            ]
        );

        let anchored = dir
            .path()
            .join("1_c_a_sa+c_b_base+entry_point_main_base.json");
        let variant = CollectionDescription::load(anchored)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(variant.attributes["c/a"], "sa");
        let a = variant.find("c/a").unwrap();
        assert_eq!(crate::serialize::serialize_process(a), "<sa>.<probe_a>");
    }

    #[test]
    fn selective_generation_removes_processes() {
        let model = load_collection(&fixture("drivers.json")).unwrap();
        let config = load_config(Some(&fixture("remove_b.json"))).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let count = generate(&model, &config, dir.path()).unwrap();
        assert!(count >= 1);
        for name in written(dir.path()) {
            let variant = CollectionDescription::load(dir.path().join(&name))
                .unwrap()
                .decode()
                .unwrap();
            assert!(variant.find("c/b").is_none(), "{name} still has c/b");
            assert!(variant.consistent());
        }
    }

    #[test]
    fn invalid_collections_are_rejected() {
        assert!(load_collection(&fixture("unknown_requirement.json")).is_err());
        assert!(load_collection(&fixture("missing.json")).is_err());
        assert!(load_config(Some(&fixture("missing.json"))).is_err());
    }
}
