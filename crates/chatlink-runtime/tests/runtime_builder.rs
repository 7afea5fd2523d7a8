//! End-to-end wiring through `RuntimeBuilder`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatlink_harness::{FixedResourceGuard, MockTransportFactory};
use chatlink_runtime::{
    ChatId, ChatlinkConfig, InitError, ResponseGenerator, RuntimeBuilder, DEFAULT_APOLOGY,
};

struct Echo;

#[async_trait]
impl ResponseGenerator for Echo {
    async fn generate(&self, _user_id: &ChatId, text: &str) -> anyhow::Result<String> {
        if text == "boom" {
            anyhow::bail!("model unavailable");
        }
        if text == "silence" {
            return Ok(String::new());
        }
        Ok(format!("echo: {text}"))
    }
}

async fn wait_for_deliveries(factory: &MockTransportFactory, count: usize) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while factory.delivered().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("replies not delivered in time");
}

#[tokio::test(start_paused = true)]
async fn test_inbound_messages_are_answered() {
    let factory = MockTransportFactory::always_ready();
    let mut runtime = RuntimeBuilder::new(Arc::new(factory.clone()))
        .with_config(ChatlinkConfig::testing())
        .with_resource_guard(Arc::new(FixedResourceGuard::relaxed()))
        .with_response_generator(Arc::new(Echo))
        .initialize_on_start(true)
        .build_and_start()
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(30), async {
        while !runtime.status().connected {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    let handle = factory.latest_handle().unwrap();
    handle.deliver_incoming("5215550001@c.us", "hola");
    wait_for_deliveries(&factory, 1).await;
    handle.deliver_incoming("5215550002@c.us", "boom");
    wait_for_deliveries(&factory, 2).await;
    handle.deliver_incoming("5215550003@c.us", "silence");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let delivered = factory.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(
        delivered[0],
        (ChatId::new("5215550001@c.us"), "echo: hola".to_string())
    );
    assert_eq!(
        delivered[1],
        (ChatId::new("5215550002@c.us"), DEFAULT_APOLOGY.to_string())
    );

    runtime.shutdown().await;
    assert!(!runtime.is_running());
    assert_eq!(
        runtime.session().initialize(false).await,
        Err(InitError::Closed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_through_handle() {
    let factory = MockTransportFactory::always_ready();
    let mut runtime = RuntimeBuilder::new(Arc::new(factory.clone()))
        .with_config(ChatlinkConfig::testing())
        .with_resource_guard(Arc::new(FixedResourceGuard::relaxed()))
        .build_and_start()
        .await
        .unwrap();

    assert!(!runtime.status().has_handle);
    let to = ChatId::new("5215550001@c.us");
    runtime.send(&to, "aviso").await.unwrap();
    assert_eq!(factory.delivered(), vec![(to, "aviso".to_string())]);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = ChatlinkConfig::testing();
    config.session.max_attempts = 0;

    let result = RuntimeBuilder::new(Arc::new(MockTransportFactory::always_ready()))
        .with_config(config)
        .build_and_start()
        .await;

    assert!(result.is_err());
}
