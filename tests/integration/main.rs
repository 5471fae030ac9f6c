//! Integration tests for sortstash

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Command isolated from the user's config and cache
    fn sortstash(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("sortstash");
        cmd.current_dir(temp.path())
            .env("SORTSTASH_CONFIG", temp.path().join("config.toml"))
            .env("SORTSTASH_CACHE_DIR", temp.path().join("cache"))
            .env_remove("RUST_LOG")
            .arg("--no-local");
        cmd
    }

    /// 8 channels, 2000 frames, spikes on channels 1 and 6
    fn write_raw(dir: &Path) -> PathBuf {
        let channels = 8;
        let mut state: u32 = 11;
        let mut data = vec![0i16; channels * 2000];
        for v in data.iter_mut() {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            *v = ((state >> 16) % 21) as i16 - 10;
        }
        for f in (100..1900).step_by(150) {
            data[f * channels + 1] = -1500;
            data[(f + 40) * channels + 6] = -1200;
        }
        let path = dir.join("session1.bin");
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn recording_args(raw: &Path) -> Vec<String> {
        vec![
            raw.display().to_string(),
            "--file-channels".into(),
            "8".into(),
            "--sampling-rate".into(),
            "30000".into(),
        ]
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cached spike sorting pipeline"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("sortstash"));
    }

    #[test]
    fn config_path_follows_env() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]"))
            .stdout(predicate::str::contains("[sorter.probe]"));
    }

    #[test]
    fn config_set_then_show() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["config", "set", "cache.key_mode", "suffix"])
            .assert()
            .success();
        sortstash(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("key_mode = \"suffix\""));
    }

    #[test]
    fn config_set_unknown_key() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn probe_tetrodes_json() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["probe", "tetrodes", "2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("contact_positions"));
    }

    #[test]
    fn probe_tetrodes_prb_roundtrip() {
        let temp = TempDir::new().unwrap();
        let prb = temp.path().join("two.prb");
        sortstash(&temp)
            .args(["probe", "tetrodes", "2", "-o"])
            .arg(&prb)
            .assert()
            .success();
        assert!(std::fs::read_to_string(&prb)
            .unwrap()
            .contains("channel_groups"));

        sortstash(&temp)
            .args(["probe", "show"])
            .arg(&prb)
            .assert()
            .success()
            .stdout(predicate::str::contains("CONTACT"));
    }

    #[test]
    fn probe_show_without_file() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["probe", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No probe file configured"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn mode_reads_header() {
        let temp = TempDir::new().unwrap();
        let set_file = temp.path().join("session1.set");
        let mut lines: Vec<String> = (0..14).map(|i| format!("key_{} 0", i)).collect();
        lines.push("mode_ch_0 3".to_string());
        std::fs::write(&set_file, lines.join("\n")).unwrap();

        sortstash(&temp)
            .arg("mode")
            .arg(&set_file)
            .assert()
            .success()
            .stdout("3\n");

        sortstash(&temp)
            .args(["mode", "--channel", "0"])
            .arg(&set_file)
            .assert()
            .success()
            .stdout("3\n");
    }

    #[test]
    fn invalid_electrode_type() {
        let temp = TempDir::new().unwrap();
        let raw = write_raw(temp.path());
        sortstash(&temp)
            .arg("preprocess")
            .args(recording_args(&raw))
            .args(["--electrode", "silicon"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Electrode type is set wrong"));
    }

    #[test]
    fn missing_recording() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["preprocess", "absent.bin"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Path not found"));
    }

    #[test]
    fn preprocess_then_reuse() {
        let temp = TempDir::new().unwrap();
        let raw = write_raw(temp.path());

        sortstash(&temp)
            .arg("preprocess")
            .args(recording_args(&raw))
            .assert()
            .success()
            .stdout(predicate::str::contains("computed"));

        sortstash(&temp)
            .arg("preprocess")
            .args(recording_args(&raw))
            .assert()
            .success()
            .stdout(predicate::str::contains("loaded from cache"));
    }

    #[test]
    fn sort_and_amplitudes() {
        let temp = TempDir::new().unwrap();
        let raw = write_raw(temp.path());

        sortstash(&temp)
            .arg("sort")
            .args(recording_args(&raw))
            .assert()
            .success()
            .stdout(predicate::str::contains("UNIT"))
            .stdout(predicate::str::contains("Total spikes"));

        sortstash(&temp)
            .arg("amplitudes")
            .args(recording_args(&raw))
            .assert()
            .success()
            .stdout(predicate::str::contains("Sorted session1 with threshold (loaded from cache)"))
            .stdout(predicate::str::contains("MEDIAN"));

        sortstash(&temp)
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("session1_preprocessed-"))
            .stdout(predicate::str::contains("session1_sorting-"))
            .stdout(predicate::str::contains("session1_sorting.amplitudes-"));
    }

    #[test]
    fn cache_list_empty() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries"));
    }

    #[test]
    fn cache_clear_requires_confirmation() {
        let temp = TempDir::new().unwrap();
        let raw = write_raw(temp.path());
        sortstash(&temp)
            .arg("preprocess")
            .args(recording_args(&raw))
            .assert()
            .success();

        sortstash(&temp)
            .args(["cache", "clear"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Aborted"));

        sortstash(&temp)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 entries"));
    }

    #[test]
    fn cache_remove_unknown_entry() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["cache", "remove", "nothing_here"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache entry not found"));
    }

    #[test]
    fn completions_generate() {
        let temp = TempDir::new().unwrap();
        sortstash(&temp)
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("sortstash"));
    }
}
