use dispatch_queue::{PanicPolicy, QueueConfig, TaskDispatchThread};

#[test]
fn test_partial_config_uses_defaults() -> anyhow::Result<()> {
    let config: QueueConfig = serde_json::from_str(r#"{ "name": "ui" }"#)?;

    assert_eq!(config.name, "ui");
    assert_eq!(config.priority_offset, 0);
    assert_eq!(config.panic_policy, PanicPolicy::CatchAndLog);
    assert!(config.establish_context);
    Ok(())
}

#[test]
fn test_full_config() -> anyhow::Result<()> {
    let config: QueueConfig = serde_json::from_str(
        r#"{
            "name": "background",
            "priority_offset": -2,
            "panic_policy": "propagate",
            "establish_context": false
        }"#,
    )?;

    assert_eq!(
        config,
        QueueConfig::new("background")
            .with_priority_offset(-2)
            .with_panic_policy(PanicPolicy::Propagate)
            .with_context(false)
    );
    Ok(())
}

#[test]
fn test_queue_reports_config() -> anyhow::Result<()> {
    let queue = TaskDispatchThread::with_config(QueueConfig::new("reporting").with_priority_offset(3))?;

    assert_eq!(queue.name(), "reporting");
    assert_eq!(queue.priority_offset(), 3);
    assert!(queue.config().establish_context);
    assert!(queue.is_running());
    Ok(())
}
