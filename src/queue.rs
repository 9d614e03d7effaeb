use anyhow::{Context, Result};
use futures_lite::stream::StreamExt;
use lapin::{options::*, types::FieldTable, BasicProperties, Connection, ConnectionProperties};

use crate::models::is_known_status;

const BUILD_STATUS_EXCHANGE: &str = "exchange/ci/v1/build-status";
const TASK_STATUS_EXCHANGE: &str = "exchange/ci/v1/task-status";
const CONTROL_QUEUE: &str = "ci-control";

fn amqp_addr() -> String {
    std::env::var("AMQP_ADDR").unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".into())
}

/// Consumes status transitions published by the orchestrator and mirrors
/// them into the dashboard's tables. The caller restarts us on any error.
pub async fn start_status_handler() -> Result<()> {
    let conn = Connection::connect(&amqp_addr(), ConnectionProperties::default()).await?;

    tracing::info!("connected to amqp");

    let channel = conn.create_channel().await?;
    channel
        .queue_declare(
            "cinder",
            QueueDeclareOptions::default(),
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            "cinder",
            BUILD_STATUS_EXCHANGE,
            "#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            "cinder",
            TASK_STATUS_EXCHANGE,
            "#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut consumer = channel
        .basic_consume(
            "cinder",
            "cinder-status",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    while let Some(Ok(msg)) = consumer.next().await {
        // Ack no matter what so a malformed message cannot wedge the queue.
        if let Err(e) = handle_message(msg.exchange.as_str(), &msg.data).await {
            tracing::error!("Error while handling message {}.", e);
        }
        msg.ack(BasicAckOptions::default()).await?;
    }

    Ok(())
}

async fn handle_message(exchange: &str, data: &[u8]) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_slice(data)?;
    let mut conn = crate::db::conn().await?;

    let status = payload["status"]
        .as_str()
        .context("status not present")?;
    anyhow::ensure!(is_known_status(status), "unknown status {:?}", status);
    let result = payload["result"].as_str();

    match exchange {
        BUILD_STATUS_EXCHANGE => {
            let build_id = payload["build"].as_i64().context("build id not present")?;
            match result {
                Some(result) => {
                    sqlx::query("UPDATE builds SET status = $2, result = $3 WHERE id = $1")
                        .bind(build_id)
                        .bind(status)
                        .bind(result)
                        .execute(&mut conn)
                        .await?;
                }
                None => {
                    sqlx::query("UPDATE builds SET status = $2 WHERE id = $1")
                        .bind(build_id)
                        .bind(status)
                        .execute(&mut conn)
                        .await?;
                }
            }
        }
        TASK_STATUS_EXCHANGE => {
            let task_id = payload["task"].as_i64().context("task id not present")?;
            match result {
                Some(result) => {
                    sqlx::query("UPDATE tasks SET status = $2, result = $3 WHERE id = $1")
                        .bind(task_id)
                        .bind(status)
                        .bind(result)
                        .execute(&mut conn)
                        .await?;
                }
                None => {
                    sqlx::query("UPDATE tasks SET status = $2 WHERE id = $1")
                        .bind(task_id)
                        .bind(status)
                        .execute(&mut conn)
                        .await?;
                }
            }
        }
        _ => {}
    }

    Ok(())
}

/// Hands a lifecycle command (resume/restart/stop) to the orchestrator.
/// The view layer never touches build state itself.
pub async fn publish_control(build_id: i64, action: &str) -> Result<()> {
    let conn = Connection::connect(&amqp_addr(), ConnectionProperties::default()).await?;
    let channel = conn.create_channel().await?;
    channel
        .queue_declare(
            CONTROL_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let payload = serde_json::to_vec(&serde_json::json!({
        "action": action,
        "build": build_id,
    }))?;

    channel
        .basic_publish(
            "",
            CONTROL_QUEUE,
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default(),
        )
        .await?
        .await?;

    tracing::info!("published {} for build {}", action, build_id);

    Ok(())
}
