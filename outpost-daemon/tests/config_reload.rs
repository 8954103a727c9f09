//! Rewriting `config.yaml` while the agent runs.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{config, Harness};
use outpost_core::{config as config_file, AgentConfig};
use outpost_daemon::{Agent, AgentEvent, EventBus};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rewritten_config_file_switches_the_install_strategy() {
    let harness = Harness::new(AgentConfig {
        sync_delay_secs: 3600,
        ..config()
    });
    config_file::save_at(harness.home.path(), &harness.config.snapshot()).expect("save");

    let bus = EventBus::new();
    bus.watch_config(&harness.config);
    let mut events = bus.subscribe();
    let mut controller = harness.controller();
    assert!(!controller.strategy().is_streaming());

    let mut agent = Agent::new(harness.context_with(Arc::new(bus.clone())), bus)
        .watch_config_file(harness.home.path());
    agent.start().expect("start");

    config_file::save_at(
        harness.home.path(),
        &AgentConfig {
            streaming: true,
            ..(*harness.config.snapshot()).clone()
        },
    )
    .expect("rewrite");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !harness.config.snapshot().streaming {
        assert!(Instant::now() < deadline, "config.yaml change was not picked up");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let changed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(AgentEvent::ConfigurationChanged { config }) => return config,
                Ok(_) => continue,
                Err(err) => panic!("event bus closed: {err}"),
            }
        }
    })
    .await
    .expect("configuration event");
    assert!(changed.streaming);

    controller.run_cycle();
    assert!(controller.strategy().is_streaming());

    agent.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agent_without_a_watched_home_ignores_the_file() {
    let harness = Harness::new(AgentConfig {
        sync_delay_secs: 3600,
        ..config()
    });
    config_file::save_at(harness.home.path(), &harness.config.snapshot()).expect("save");

    let bus = EventBus::new();
    let mut agent = Agent::new(harness.context_with(Arc::new(bus.clone())), bus);
    agent.start().expect("start");

    config_file::save_at(
        harness.home.path(),
        &AgentConfig {
            streaming: true,
            ..(*harness.config.snapshot()).clone()
        },
    )
    .expect("rewrite");
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!harness.config.snapshot().streaming);
    agent.stop().await.expect("stop");
}
