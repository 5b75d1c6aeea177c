//! Registry detection and the built-in loaders run end to end on DuckDB

#![cfg(feature = "duckdb-backend")]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uk_education_etl::pipeline::{LoadStatus, PipelineError, PipelineOptions, RunStatus};
use uk_education_etl::{DatabaseGateway, DatasetConfig, DuckDbGateway, PipelineRegistry, Value};

const KS4_CSV: &str = "\
time_period,geographic_level,school_urn,school_name,new_la_code,avg_att8,avg_p8score,avg_ebaccaps,pt_ebacc_95,pt_l2basics_95,pt_l2basics_94,t_pupils,t_inp8calc,t_att8
202324,National,,,,46.1,0,4.0,40,45,65,600000,550000,580000
202324,School,100001,Alpha Academy,E09000001,48.2,0.12,4.3,38.5,55.0,70.1,180,170,178
202324,School,100002,Beta School,E09000002,z,c,x,SUPP,52,71,150,140,148
202324,School,100003,Gamma High,E09000003,39.0,-0.45,3.9,20,35,55,90,85,89
";

const SEN_CSV: &str = "\
time_period,geographic_level,new_la_code,la_name,sen_status,sen_primary_need,number_of_pupils
202425,National,,England,Total,Total,1500000
202425,Local authority,E09000001,City of London,\"Education, Health and Care plans\",Autistic Spectrum Disorder,12
202425,Local authority,E09000001,City of London,SEN support / SEN without an EHC plan,Total,40
202425,Local authority,E09000002,Barking and Dagenham,SEN support / SEN without an EHC plan,\"Speech, Language and Communications needs\",210
202425,Local authority,E09000002,Barking and Dagenham,No identified SEN,Missing,3000
";

fn write(dir: &TempDir, relative: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, bytes).unwrap();
    path
}

fn ks4_file(dir: &TempDir) -> PathBuf {
    write(
        dir,
        "key-stage-4-performance_2023-24/data/202324_performance_tables_schools_final.csv",
        KS4_CSV.as_bytes(),
    )
}

fn setup() -> (TempDir, DuckDbGateway, DatasetConfig, PipelineRegistry) {
    let dir = TempDir::new().unwrap();
    let config = DatasetConfig::default().with_data_root(dir.path());
    (
        dir,
        DuckDbGateway::memory().unwrap(),
        config,
        PipelineRegistry::with_defaults(),
    )
}

fn count(db: &dyn DatabaseGateway, table: &str) -> i64 {
    db.count_rows(table).unwrap()
}

#[test]
fn test_detect_examples() {
    assert_eq!(
        PipelineRegistry::detect(Path::new(
            "data/dfe/key-stage-4-performance_2023-24/data/202324_performance_tables_schools_final.csv"
        )),
        Some("ks4_performance")
    );
    assert_eq!(
        PipelineRegistry::detect(Path::new(
            "data/dfe/special-educational-needs-in-england_2024-25/data/sen_ncyear_new_.csv"
        )),
        Some("sen_statistics")
    );
    assert_eq!(PipelineRegistry::detect(Path::new("data/misc/random_file.csv")), None);
}

#[test]
fn test_ks4_end_to_end_and_rerun() {
    let (dir, db, config, registry) = setup();
    let path = ks4_file(&dir);

    let report = registry
        .smart_run(&path, PipelineOptions::new(), &config, &db)
        .unwrap()
        .unwrap();
    assert_eq!(report.pipeline, "ks4_performance");
    assert_eq!(report.status, RunStatus::Succeeded, "errors: {:?}", report.errors);
    assert_eq!(report.academic_year, "2023-24");
    assert_eq!(report.records_loaded.get("schools"), Some(&3));
    assert_eq!(report.records_loaded.get("school_performance"), Some(&3));
    assert_eq!(count(&db, "schools"), 3);

    let att8 = db
        .read(
            "SELECT attainment_8_score FROM school_performance WHERE urn = $1",
            &[Value::Int(100002)],
        )
        .unwrap();
    assert_eq!(att8.value(0, "attainment_8_score"), Some(&Value::Null));

    let rerun = registry
        .run("ks4_performance", &path, PipelineOptions::new(), &config, &db)
        .unwrap();
    assert!(rerun.is_success());
    assert_eq!(rerun.total_records, 0);
    assert_eq!(count(&db, "schools"), 3);
    assert_eq!(count(&db, "school_performance"), 3);

    let history = registry.history(&db, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].id > history[1].id);
    assert_eq!(history[0].source_name, "DfE Key Stage 4 Performance Tables");
    assert_eq!(history[1].records_loaded, 6);
}

#[test]
fn test_ks4_dry_run_counts_match_real_run() {
    let (dir, db, config, registry) = setup();
    let path = ks4_file(&dir);

    let dry = registry
        .run("ks4_performance", &path, PipelineOptions::new().dry_run(true), &config, &db)
        .unwrap();
    assert!(dry.is_success(), "errors: {:?}", dry.errors);
    assert!(dry.warnings.iter().all(|w| !w.starts_with("Filtered")));
    assert!(!db.table_exists("schools").unwrap());

    let real = registry
        .run("ks4_performance", &path, PipelineOptions::new(), &config, &db)
        .unwrap();
    assert_eq!(dry.records_loaded, real.records_loaded);
    assert_eq!(dry.records_loaded.get("school_performance"), Some(&3));
}

#[test]
fn test_ofsted_filters_to_known_schools() {
    let (dir, db, config, registry) = setup();
    registry
        .run("ks4_performance", &ks4_file(&dir), PipelineOptions::new(), &config, &db)
        .unwrap();

    // Windows-1252 encoded school name
    let mut csv = b"URN,School name,Inspection start date,Publication date,Inspection type,Overall effectiveness,Quality of education\n".to_vec();
    csv.extend_from_slice(b"100001,\xC9cole Alpha,14/03/2024,20/04/2024,S5 Inspection,2,2\n");
    csv.extend_from_slice(b"100003,Gamma High,01/11/2023,05/12/2023,S8 Inspection,9,9\n");
    csv.extend_from_slice(b"999999,Unknown,02/02/2024,01/03/2024,S5 Inspection,1,1\n");
    csv.extend_from_slice(b"100002,Beta School,,,S5 Inspection,3,3\n");
    let path = write(&dir, "ofsted/state_funded_schools_inspections_2024.csv", &csv);

    let report = registry
        .smart_run(&path, PipelineOptions::new(), &config, &db)
        .unwrap()
        .unwrap();
    assert_eq!(report.pipeline, "ofsted_inspections");
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.records_loaded.get("ofsted_inspections"), Some(&2));
    assert!(
        report
            .warnings
            .contains(&"Removed 1 records without an inspection date".to_string())
    );
    assert!(
        report
            .warnings
            .contains(&"Filtered 1 records with no matching urn in schools".to_string())
    );

    let ratings = db
        .read(
            "SELECT overall_effectiveness FROM ofsted_inspections WHERE urn = $1",
            &[Value::Int(100003)],
        )
        .unwrap();
    assert_eq!(ratings.value(0, "overall_effectiveness"), Some(&Value::Null));
}

#[test]
fn test_ofsted_without_schools_loads_nothing() {
    let (dir, db, config, registry) = setup();
    let path = write(
        &dir,
        "ofsted/inspections.csv",
        b"URN,Inspection start date\n100001,14/03/2024\n",
    );

    let report = registry
        .run("ofsted_inspections", &path, PipelineOptions::new(), &config, &db)
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.total_records, 0);
    assert!(!db.table_exists("ofsted_inspections").unwrap());
}

#[test]
fn test_sen_end_to_end() {
    let (dir, db, config, registry) = setup();
    let path = write(
        &dir,
        "special-educational-needs-in-england_2024-25/data/sen_ncyear_new_.csv",
        SEN_CSV.as_bytes(),
    );

    let report = registry
        .smart_run(&path, PipelineOptions::new(), &config, &db)
        .unwrap()
        .unwrap();
    assert_eq!(report.pipeline, "sen_statistics");
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.academic_year, "2024-25");
    assert_eq!(report.records_loaded.get("local_authorities"), Some(&2));
    assert_eq!(report.records_loaded.get("sen_pupils"), Some(&2));

    let codes = db
        .read("SELECT primary_need_code FROM sen_pupils ORDER BY primary_need_code", &[])
        .unwrap();
    let codes: Vec<_> = codes.column("primary_need_code").unwrap().cloned().collect();
    assert_eq!(codes, vec![Value::text("ASD"), Value::text("SLCN")]);
}

#[test]
fn test_smart_run_returns_none_for_unknown_files() {
    let (dir, db, config, registry) = setup();
    let path = write(&dir, "misc/notes.csv", b"a,b\n1,2\n");

    let outcome = registry
        .smart_run(&path, PipelineOptions::new(), &config, &db)
        .unwrap();
    assert!(outcome.is_none());
    assert!(registry.history(&db, 10).unwrap().is_empty());
}

#[test]
fn test_detected_dataset_without_loader_is_not_found() {
    let (dir, db, config, registry) = setup();
    let path = write(&dir, "graduate_outcomes_2023.csv", b"a\n1\n");

    let err = registry
        .smart_run(&path, PipelineOptions::new(), &config, &db)
        .unwrap_err();
    match err {
        PipelineError::NotFound { name, available } => {
            assert_eq!(name, "graduate_outcomes");
            assert_eq!(available.len(), 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_failed_run_appears_in_summary() {
    let (dir, db, config, registry) = setup();
    let path = write(&dir, "key-stage-4/broken.csv", b"unrelated\nvalue\n");

    let report = registry
        .run("ks4_performance", &path, PipelineOptions::new(), &config, &db)
        .unwrap();
    assert_eq!(report.status, RunStatus::Failed);

    let summary = registry.summary(&db, 5).unwrap();
    assert_eq!(summary.total_loads, 1);
    assert_eq!(summary.successful_loads, 0);
    assert_eq!(summary.recent[0].load_status, LoadStatus::Failed);
}

#[test]
fn test_discovers_latest_file() {
    let (dir, _db, config, _registry) = setup();
    let path = ks4_file(&dir);

    let latest = config.latest_file("ks4_performance").unwrap().unwrap();
    assert_eq!(latest.path, path);
    assert_eq!(latest.academic_year, "2023-24");
}
