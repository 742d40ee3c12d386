use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use dac_core::analysis::{AnalysisEngine, AnalysisRequest, FixedClock, Params};
use dac_core::config::AnalysisConfig;
use dac_core::dataset::{DatasetRef, InMemoryDatasets, Table};

const SALES_CSV: &str = "\
month,region,sales,units
January,north,90,9
February,north,95,10
March,north,120,12
March,south,100,11
March,east,140,
April,south,130,14
";

fn engine_with(cfg: AnalysisConfig) -> (Arc<InMemoryDatasets>, AnalysisEngine) {
    let datasets = Arc::new(InMemoryDatasets::new());
    datasets.register(
        DatasetRef::new("sales"),
        Table::from_csv_str(SALES_CSV).expect("csv"),
    );
    let engine = AnalysisEngine::new(datasets.clone(), &cfg)
        .with_clock(Arc::new(FixedClock("2026-03-31T12:00:00Z".to_string())));
    (datasets, engine)
}

fn params(v: serde_json::Value) -> Params {
    serde_json::from_value(v).expect("params")
}

#[test]
fn average_sales_in_march_is_filtered_mean() {
    let (_, engine) = engine_with(AnalysisConfig::default());
    let res = engine
        .run(
            "summary_statistics",
            &DatasetRef::new("sales"),
            &params(json!({"column": "sales", "where": {"month": "March"}})),
        )
        .expect("run");

    assert_eq!(res.operation_name, "summary_statistics");
    assert_eq!(res.operation_version, 1);
    assert_eq!(res.value["mean"], json!(120.0));
    assert_eq!(res.value["count"], json!(3));
    assert_eq!(res.value["row_count"], json!(3));
    assert!(!res.truncated);
    assert_eq!(res.computed_at, "2026-03-31T12:00:00Z");
}

#[test]
fn identical_runs_are_byte_identical() {
    let (_, cached) = engine_with(AnalysisConfig::default());
    let uncached = {
        let (_, e) = engine_with(AnalysisConfig::default());
        e.with_cache(None)
    };
    let p = params(json!({"columns": ["sales", "units"], "where": {"region": "north"}}));
    let dref = DatasetRef::new("sales");

    let a = uncached.run("correlation", &dref, &p).expect("a");
    let b = uncached.run("correlation", &dref, &p).expect("b");
    let c = cached.run("correlation", &dref, &p).expect("c");

    assert_eq!(a.to_canonical_json().unwrap(), b.to_canonical_json().unwrap());
    assert_eq!(a.to_canonical_json().unwrap(), c.to_canonical_json().unwrap());
    assert_eq!(a.digest(), c.digest());
}

#[test]
fn parameter_order_does_not_change_result() {
    let (_, engine) = engine_with(AnalysisConfig::default());
    let dref = DatasetRef::new("sales");
    let a = engine
        .run_request(
            &dref,
            &AnalysisRequest::new("value_counts")
                .param("column", json!("region"))
                .param("limit", json!(2)),
        )
        .expect("a");
    let b = engine
        .run_request(
            &dref,
            &AnalysisRequest::new("value_counts")
                .param("limit", json!(2))
                .param("column", json!("region")),
        )
        .expect("b");
    assert_eq!(a, b);
    assert_eq!(
        a.value["counts"],
        json!([{"value": "north", "count": 3}, {"value": "south", "count": 2}])
    );
}

#[test]
fn unsupported_operation_is_rejected_before_dataset_lookup() {
    let (_, engine) = engine_with(AnalysisConfig::default());
    let err = engine
        .run("forecast_arima", &DatasetRef::new("missing"), &Params::new())
        .unwrap_err();
    assert_eq!(err.code, "ANALYSIS_UNSUPPORTED_OPERATION");
}

#[test]
fn unknown_dataset_and_bad_parameters_are_reported() {
    let (_, engine) = engine_with(AnalysisConfig::default());
    let err = engine
        .run("dataset_overview", &DatasetRef::new("missing"), &Params::new())
        .unwrap_err();
    assert_eq!(err.code, "DATASET_NOT_FOUND");

    let err = engine
        .run(
            "summary_statistics",
            &DatasetRef::new("sales"),
            &params(json!({"column": "revenue"})),
        )
        .unwrap_err();
    assert_eq!(err.code, "ANALYSIS_INVALID_PARAMETERS");

    let err = engine
        .run(
            "summary_statistics",
            &DatasetRef::new("sales"),
            &params(json!({"where": ["month", "March"]})),
        )
        .unwrap_err();
    assert_eq!(err.code, "ANALYSIS_INVALID_PARAMETERS");
}

#[test]
fn oversized_results_are_summarized_with_full_value_available() {
    let mut csv = String::from("id,label\n");
    for i in 0..400 {
        csv.push_str(&format!("{},label_{:04}\n", i, i));
    }
    let datasets = Arc::new(InMemoryDatasets::new());
    datasets.register(DatasetRef::new("wide"), Table::from_csv_str(&csv).unwrap());
    let engine = AnalysisEngine::new(
        datasets,
        &AnalysisConfig {
            max_result_chars: 300,
            ..AnalysisConfig::default()
        },
    );

    let p = params(json!({"column": "label", "limit": 400}));
    let run = engine
        .run_detailed("value_counts", &DatasetRef::new("wide"), &p)
        .expect("run");
    assert!(run.result.truncated);
    assert!(serde_json::to_string(&run.result.value).unwrap().len() <= 300);
    assert_eq!(run.full_value["counts"].as_array().unwrap().len(), 400);
    assert_eq!(run.result.value["distinct"], json!(400));
}

#[test]
fn replacing_a_dataset_changes_fingerprint_and_bypasses_cache() {
    let (datasets, engine) = engine_with(AnalysisConfig::default());
    let dref = DatasetRef::new("sales");
    let p = params(json!({"column": "sales"}));
    let before = engine.run("summary_statistics", &dref, &p).expect("before");

    datasets.register(
        dref.clone(),
        Table::from_csv_str("month,sales\nMarch,10\nMarch,20\n").unwrap(),
    );
    let after = engine.run("summary_statistics", &dref, &p).expect("after");

    assert_ne!(before.dataset_fingerprint, after.dataset_fingerprint);
    assert_eq!(after.value["mean"], json!(15.0));
}

#[test]
fn identical_tables_under_different_refs_keep_their_own_provenance() {
    let (datasets, engine) = engine_with(AnalysisConfig::default());
    let store_a = DatasetRef::new("store_a");
    let store_b = DatasetRef::new("store_b");
    datasets.register(store_a.clone(), Table::from_csv_str(SALES_CSV).expect("csv"));
    datasets.register(store_b.clone(), Table::from_csv_str(SALES_CSV).expect("csv"));
    let p = params(json!({"column": "sales"}));

    let a = engine.run("summary_statistics", &store_a, &p).expect("a");
    let b = engine.run("summary_statistics", &store_b, &p).expect("b");

    assert_eq!(a.dataset_fingerprint, b.dataset_fingerprint);
    assert_eq!(a.dataset_ref, store_a);
    assert_eq!(b.dataset_ref, store_b);
    assert_ne!(a.digest(), b.digest());

    let uncached = {
        let (d, e) = engine_with(AnalysisConfig::default());
        d.register(store_b.clone(), Table::from_csv_str(SALES_CSV).expect("csv"));
        e.with_cache(None)
    };
    let fresh = uncached.run("summary_statistics", &store_b, &p).expect("fresh");
    assert_eq!(fresh.to_canonical_json().unwrap(), b.to_canonical_json().unwrap());
}

#[test]
fn registry_lists_versioned_operations() {
    let names: Vec<&str> = AnalysisEngine::operations().iter().map(|o| o.name).collect();
    assert_eq!(
        names,
        vec![
            "summary_statistics",
            "correlation",
            "trend_detection",
            "value_counts",
            "missing_values",
            "dataset_overview"
        ]
    );
    assert!(AnalysisEngine::operations().iter().all(|o| o.version == 1));
}
