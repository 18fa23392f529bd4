use super::*;

#[test]
fn test_secrets_are_scrubbed() {
    let env = EnvSnapshot::from_pairs([
        ("DBT_ENV_SECRET_PASSWORD", "hunter2"),
        ("DBT_ENV_SECRET_EMPTY", ""),
        ("HOME", "/root"),
    ]);
    let scrubber = env.scrubber();
    assert_eq!(
        scrubber.scrub("login failed for hunter2 at /root"),
        "login failed for ***** at /root"
    );
}

#[test]
fn test_overlapping_secrets_longest_first() {
    let scrubber = SecretScrubber::new(vec!["abc".to_string(), "abcdef".to_string()]);
    assert_eq!(scrubber.scrub("token=abcdef"), "token=*****");
}

#[test]
fn test_custom_env_prefix_stripped() {
    let env = EnvSnapshot::from_pairs([
        ("DBT_ENV_CUSTOM_ENV_run_id", "42"),
        ("DBT_ENV_CUSTOM_ENV_team", "data"),
        ("OTHER", "x"),
    ]);
    let custom = env.custom_env();
    assert_eq!(custom.len(), 2);
    assert_eq!(custom.get("run_id").map(String::as_str), Some("42"));
}

#[test]
fn test_unknown_engine_vars_reported() {
    let env = EnvSnapshot::from_pairs([
        ("DBT_ENGINE_MY_CUSTOM_ENV_VAR_FOR_TESTING", "True"),
        ("DBT_TARGET", "dev"),
    ]);
    assert_eq!(
        env.unknown_engine_vars(),
        vec!["DBT_ENGINE_MY_CUSTOM_ENV_VAR_FOR_TESTING".to_string()]
    );
}

#[test]
fn test_maximum_seed_size() {
    assert_eq!(EnvSnapshot::default().maximum_seed_size_bytes(), 1024 * 1024);
    let env = EnvSnapshot::from_pairs([(MAXIMUM_SEED_SIZE_ENV, "3")]);
    assert_eq!(env.maximum_seed_size_bytes(), 3 * 1024 * 1024);
    let bad = EnvSnapshot::from_pairs([(MAXIMUM_SEED_SIZE_ENV, "lots")]);
    assert_eq!(bad.maximum_seed_size_bytes(), 1024 * 1024);
}

#[test]
fn test_huge_maximum_seed_size_saturates() {
    let huge = u64::MAX.to_string();
    let env = EnvSnapshot::from_pairs([(MAXIMUM_SEED_SIZE_ENV, huge.as_str())]);
    assert_eq!(env.maximum_seed_size_bytes(), u64::MAX);
}

// These tests modify environment variables and must run serially
use serial_test::serial;

#[test]
#[serial]
fn test_from_process_sees_secret_vars() {
    let original = std::env::var("DBT_ENV_SECRET_TOKEN").ok();
    std::env::set_var("DBT_ENV_SECRET_TOKEN", "s3cr3t-value");
    let env = EnvSnapshot::from_process();
    assert_eq!(env.get("DBT_ENV_SECRET_TOKEN"), Some("s3cr3t-value"));
    assert!(env.secrets().contains(&"s3cr3t-value".to_string()));
    match original {
        Some(v) => std::env::set_var("DBT_ENV_SECRET_TOKEN", v),
        None => std::env::remove_var("DBT_ENV_SECRET_TOKEN"),
    }
}

#[test]
#[serial]
fn test_from_process_is_a_snapshot() {
    std::env::remove_var("DBT_ENV_CUSTOM_ENV_RUN_ID");
    let env = EnvSnapshot::from_process();
    std::env::set_var("DBT_ENV_CUSTOM_ENV_RUN_ID", "42");
    assert!(env.custom_env().get("RUN_ID").is_none());
    assert_eq!(EnvSnapshot::from_process().custom_env().get("RUN_ID").map(String::as_str), Some("42"));
    std::env::remove_var("DBT_ENV_CUSTOM_ENV_RUN_ID");
}
