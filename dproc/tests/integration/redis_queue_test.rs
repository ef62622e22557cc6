// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Redis queue adapter against a live broker. Ignored by default; run with
//! a local Redis and `cargo test -- --ignored`. These tests share one
//! database, so they expect an otherwise idle instance.

use serde_json::json;

use dproc::infrastructure::queue::RedisJobQueue;
use dproc_domain::{EnqueueOptions, JobEnvelope, JobId, JobPriority, JobQueue, RetryPolicy};

fn redis_url() -> String {
    let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
    format!("redis://{}:{}", host, port)
}

fn envelope(tag: &str, priority: JobPriority) -> JobEnvelope {
    JobEnvelope {
        job_id: JobId::generate(tag, chrono::Utc::now().timestamp_millis()),
        pipeline_name: "demo".to_string(),
        inputs: json!({"topic": tag}),
        output_format: "mdx".to_string(),
        priority,
        user_id: None,
        created_at: chrono::Utc::now().timestamp_millis(),
    }
}

#[tokio::test]
#[ignore] // requires a running redis
async fn test_enqueue_claim_ack_round_trip() {
    let queue = RedisJobQueue::connect(&redis_url()).await.unwrap();

    let job_id = queue
        .enqueue(
            envelope("rt", JobPriority::Normal),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let claimed = queue.claim("w1").await.unwrap().unwrap();
    assert_eq!(claimed.handle.job_id, job_id);
    assert_eq!(claimed.handle.attempt, 1);
    queue.heartbeat(&claimed.handle).await.unwrap();
    queue.ack(claimed.handle).await.unwrap();
}

#[tokio::test]
#[ignore] // requires a running redis
async fn test_priority_lanes_on_broker() {
    let queue = RedisJobQueue::connect(&redis_url()).await.unwrap();

    for priority in [JobPriority::Low, JobPriority::Normal, JobPriority::High] {
        queue
            .enqueue(
                envelope("lane", priority),
                EnqueueOptions {
                    priority,
                    retry: RetryPolicy::default(),
                },
            )
            .await
            .unwrap();
    }

    let mut order = Vec::new();
    while let Some(job) = queue.claim("w1").await.unwrap() {
        order.push(job.envelope.priority);
        queue.ack(job.handle).await.unwrap();
    }
    assert_eq!(
        order,
        vec![JobPriority::High, JobPriority::Normal, JobPriority::Low]
    );
}

#[tokio::test]
#[ignore] // requires a running redis
async fn test_remove_pending_on_broker() {
    let queue = RedisJobQueue::connect(&redis_url()).await.unwrap();

    let job_id = queue
        .enqueue(envelope("rm", JobPriority::Low), EnqueueOptions::default())
        .await
        .unwrap();
    assert!(queue.remove(&job_id).await.unwrap());
    assert!(!queue.remove(&job_id).await.unwrap());
}
