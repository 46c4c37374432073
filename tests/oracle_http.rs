//! Labeling through the HTTP oracle client against a mocked chat-completions endpoint.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use post_labeler::{
    clients::{
        classifier::BatchClassifier,
        oracle::{ChatCompletionsOracle, OracleSettings, PromptBuilder},
    },
    observability::Telemetry,
    pipeline::{CheckpointMode, JobSettings, LabelingJob},
    store::{ColumnSpec, DatasetStore},
    taxonomy::Taxonomy,
    util::retry::RetryPolicy,
};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "model": "gpt-4.1-mini",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn http_oracle_recovers_from_server_error_and_labels_posts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream overloaded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    let content = json!([
        {
            "id": 101,
            "primary_category": "Trade Policy / Tariffs / Manufacturing",
            "secondary_tags": {
                "timing": "InTradingWindow",
                "targets_entity": "False",
                "sentiment": "Negative",
                "has_action_keywords": "False",
                "intensity": "High"
            }
        },
        {
            "id": "102",
            "primary_category": "Personal / Social / Non-Policy Content (Congrats, Holidays, Misc)",
            "secondary_tags": {
                "timing": "OutsideTradingWindow",
                "targets_entity": "False",
                "sentiment": "Positive",
                "has_action_keywords": "False",
                "intensity": "Low"
            }
        }
    ])
    .to_string();
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&content)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let settings = JobSettings {
        input_path: dir.path().join("in.csv"),
        output_path: dir.path().join("out.csv"),
        checkpoint_path: dir.path().join("out.tmp.csv"),
        batch_size: NonZeroUsize::new(25).expect("non-zero"),
        checkpoint_every: NonZeroUsize::new(20).expect("non-zero"),
        checkpoint_mode: CheckpointMode::BatchIndex,
        columns: ColumnSpec::default(),
    };
    std::fs::write(
        &settings.input_path,
        "id,text,date\n101,\"More TARIFFS on China!!!\",2019-05-10 11:00:00\n102,Happy Thanksgiving to all,2019-11-28 08:00:00\n",
    )
    .expect("input written");

    let oracle = ChatCompletionsOracle::new(&OracleSettings {
        base_url: format!("{}/v1", server.uri()),
        api_key: "sk-test".to_string(),
        model: "gpt-4.1-mini".to_string(),
        timeout: Duration::from_secs(5),
    })
    .expect("client builds");
    let telemetry = Telemetry::without_tracing().expect("telemetry");
    let classifier = BatchClassifier::new(
        Arc::new(oracle),
        PromptBuilder::new(Arc::new(Taxonomy::builtin()), "v2"),
        RetryPolicy::immediate(3),
        telemetry.metrics(),
    )
    .with_strict_identifiers(true);
    let job = LabelingJob::new(settings.clone(), Arc::new(classifier), telemetry.metrics());

    let summary = job.execute().await.expect("job completes");

    assert_eq!(summary.rows_labeled, 2);
    let output = DatasetStore::from_path(&settings.output_path, &settings.columns)
        .expect("output loads");
    assert_eq!(
        output.primary_category(0),
        Some("Trade Policy / Tariffs / Manufacturing")
    );
    assert_eq!(
        output.secondary_tags(0),
        Some(
            r#"{"has_action_keywords":"False","intensity":"High","sentiment":"Negative","targets_entity":"False","timing":"InTradingWindow"}"#
        )
    );
    assert!(output.primary_category(1).is_some());

    let rendered = telemetry.render_prometheus();
    assert!(rendered.contains("labeler_oracle_attempts_total 2"));
    assert!(rendered.contains("labeler_oracle_failures_total 1"));
}
