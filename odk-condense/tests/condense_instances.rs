//! End-to-end tests: instance directories on disk to rows in a CSV table

use odk_condense::{
    CondenseError, Condenser, EngineConfig, FormSchema, LookupTable, OutputTable, WriteMode,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const HOUSEHOLD_LOG: &str = "# Form log v1.0\n\
    1500000000000\tBF\tBF\t\n\
    1500000001000\tEP\t/HHQ/age[1]\t\n\
    1500000003000\tLP\t/HHQ/age[1]\t41\n\
    1500000003500\tSW\t/HHQ/age[1]\t\n\
    1500000004000\tEP\t/HHQ/sex[1]\t\n\
    1500000016000\tLP\t/HHQ/sex[1]\tfemale\n\
    1500000017000\tSF\tnull\t\n";

const FACILITY_LOG: &str = "# Form log v1.0\n\
    1500000000000\tEP\t/SDP/facility_name[1]\t\n\
    1500000002000\tLP\t/SDP/facility_name[1]\tClinic\n";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_instance(root: &Path, id: &str, log: &str, submission: &str) -> PathBuf {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("log.txt"), log).unwrap();
    std::fs::write(dir.join("submission.xml"), submission).unwrap();
    dir
}

fn household_submission(province: &str) -> String {
    format!(
        r#"<?xml version="1.0"?><HHQ id="HQ-v12" version="1"><province>{}</province><age>41</age></HHQ>"#,
        province
    )
}

fn lookup() -> LookupTable {
    let mut lookup = LookupTable::new();
    lookup.add_form(
        FormSchema::new("HQ-v12", "Household")
            .with_prompts(["age", "sex"])
            .with_tags(["province"]),
    );
    lookup.add_form(FormSchema::new("SDP-v1", "Facility").with_prompts(["facility_name"]));
    lookup
}

#[test]
fn test_condense_and_append_rows() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let first = write_instance(dir.path(), "uuid1", HOUSEHOLD_LOG, &household_submission("Kinshasa"));
    let second = write_instance(dir.path(), "uuid2", HOUSEHOLD_LOG, &household_submission("Kasai"));
    std::fs::write(first.join("1500000002000.jpg"), [0u8; 64]).unwrap();

    let condenser = Condenser::new(EngineConfig::new()).with_lookup(lookup());
    let out = dir.path().join("condensed.csv");
    let mut table = OutputTable::open(&out, WriteMode::Append).unwrap();

    for path in [&first, &second] {
        let condensed = condenser.condense_dir(path).unwrap();
        table.append(&condensed.columns(), &condensed.row()).unwrap();
    }

    let mut reader = csv::Reader::from_path(&out).unwrap();
    let headers = reader.headers().unwrap().clone();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 2);

    let column = |name: &str| headers.iter().position(|h| h == name).unwrap();
    assert_eq!(&rows[0][column("instance_id")], "uuid1");
    assert_eq!(&rows[0][column("province")], "Kinshasa");
    assert_eq!(&rows[1][column("province")], "Kasai");
    assert_eq!(&rows[0][column("photo_bytes")], "64");
    assert_eq!(&rows[1][column("photo_bytes")], "0");
    assert_eq!(&rows[0][column("log_version")], "v1.0");

    // age: 2 s active; sex: one 12 s gap counted as a break
    assert_eq!(&rows[0][column("age_t")], "2000");
    assert_eq!(&rows[0][column("age_d")], "1");
    assert_eq!(&rows[0][column("sex_t")], "0");
    assert_eq!(&rows[0][column("sex_b")], "12000");
    assert_eq!(&rows[0][column("total_swipe_events")], "1");
    assert_eq!(&rows[0][column("screen_count")], "2");
    assert_eq!(&rows[0][column("save_count")], "1");
}

#[test]
fn test_second_form_with_different_columns_is_rejected() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let household = write_instance(dir.path(), "uuid1", HOUSEHOLD_LOG, &household_submission("Kinshasa"));
    let facility = write_instance(
        dir.path(),
        "uuid2",
        FACILITY_LOG,
        r#"<SDP id="SDP-v1"><facility_name>Clinic</facility_name></SDP>"#,
    );

    let condenser = Condenser::new(EngineConfig::new()).with_lookup(lookup());
    let out = dir.path().join("condensed.csv");
    let mut table = OutputTable::open(&out, WriteMode::Append).unwrap();

    let first = condenser.condense_dir(&household).unwrap();
    table.append(&first.columns(), &first.row()).unwrap();
    let before = std::fs::read_to_string(&out).unwrap();

    let second = condenser.condense_dir(&facility).unwrap();
    let result = table.append(&second.columns(), &second.row());
    match result {
        Err(CondenseError::HeaderMismatch(mismatch)) => {
            assert!(mismatch.missing.contains(&"age_t".to_string()));
            assert!(mismatch.extra.contains(&"facility_name_t".to_string()));
        }
        other => panic!("expected header mismatch, got {:?}", other),
    }

    assert_eq!(std::fs::read_to_string(&out).unwrap(), before);
}

#[test]
fn test_reopened_table_skips_analyzed_instances() {
    let dir = TempDir::new().unwrap();
    let instance = write_instance(dir.path(), "uuid1", HOUSEHOLD_LOG, &household_submission("Kinshasa"));
    let condenser = Condenser::new(EngineConfig::new()).with_lookup(lookup());
    let out = dir.path().join("condensed.csv");

    {
        let mut table = OutputTable::open(&out, WriteMode::Append).unwrap();
        let condensed = condenser.condense_dir(&instance).unwrap();
        table.append(&condensed.columns(), &condensed.row()).unwrap();
    }

    let table = OutputTable::open(&out, WriteMode::Append).unwrap();
    assert!(table.contains("uuid1"));
    assert!(!table.contains("uuid2"));
}

#[test]
fn test_broken_instance_fails_alone() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let good = write_instance(dir.path(), "uuid1", HOUSEHOLD_LOG, &household_submission("Kinshasa"));
    let broken = write_instance(dir.path(), "uuid2", HOUSEHOLD_LOG, "<HHQ id=\"HQ-v12\"><age>");
    let missing_log = dir.path().join("uuid3");
    std::fs::create_dir_all(&missing_log).unwrap();
    std::fs::write(missing_log.join("submission.xml"), household_submission("Kasai")).unwrap();

    let condenser = Condenser::new(EngineConfig::new()).with_lookup(lookup());
    assert!(condenser.condense_dir(&good).is_ok());
    assert!(matches!(
        condenser.condense_dir(&broken),
        Err(CondenseError::XmlParseError(_))
    ));
    assert!(matches!(
        condenser.condense_dir(&missing_log),
        Err(CondenseError::MissingArtifact(_))
    ));
}
