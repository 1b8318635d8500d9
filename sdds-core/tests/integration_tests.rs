//! Integration tests for the SDDS decoder and writers.
//!
//! Run with: cargo test --test integration_tests

use sdds_core::output::{write_csv, write_sdds};
use sdds_core::{
    load_dataset, ColumnData, ColumnDef, DataMode, DataType, Dataset, DecodeError, DecoderConfig,
    Endianness, Page, ParameterDef, Schema, SddsDecoder, SddsWriter, Value,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

const TEST_FILE: &str = "test_data/ring_status.sdds";

fn orbit_dataset() -> Dataset {
    let mut bpm = ColumnDef::new("BPM", DataType::String);
    bpm.description = Some("monitor name".to_string());
    let mut x = ColumnDef::new("x", DataType::Double);
    x.units = Some("mm".to_string());

    let schema = Schema {
        parameters: vec![
            ParameterDef::new("Step", DataType::Long64),
            ParameterDef::new("Plane", DataType::Character),
        ],
        columns: vec![
            bpm,
            x,
            ColumnDef::new("Valid", DataType::Long),
            ColumnDef::new("Gain", DataType::Float),
        ],
        ..Schema::default()
    };

    let pages = vec![
        Page {
            row_count: 3,
            parameters: vec![Value::Long64(9_000_000_001), Value::Character('H')],
            columns: vec![
                ColumnData::String(vec![
                    "S1 BPM".to_string(),
                    "".to_string(),
                    "quote \"q\"".to_string(),
                ]),
                ColumnData::Double(vec![0.125, -1.5e-7, 3.0]),
                ColumnData::Long(vec![1, 0, -1]),
                ColumnData::Float(vec![1.0, 0.25, 2.5]),
            ],
        },
        Page {
            row_count: 0,
            parameters: vec![Value::Long64(-2), Value::Character('V')],
            columns: vec![
                ColumnData::String(vec![]),
                ColumnData::Double(vec![]),
                ColumnData::Long(vec![]),
                ColumnData::Float(vec![]),
            ],
        },
    ];

    let mut parameters = BTreeMap::new();
    parameters.insert("Step".to_string(), Value::Long64(9_000_000_001));
    parameters.insert("Plane".to_string(), Value::Character('H'));

    Dataset {
        schema,
        parameters,
        pages,
    }
}

fn assert_same_data(decoded: &Dataset, expected: &Dataset) {
    assert_eq!(decoded.schema.parameters, expected.schema.parameters);
    assert_eq!(decoded.schema.columns, expected.schema.columns);
    assert_eq!(decoded.parameters, expected.parameters);
    assert_eq!(decoded.pages, expected.pages);
}

#[test]
fn test_decode_sample_file() {
    let dataset = load_dataset(TEST_FILE).expect("Failed to decode sample file");

    assert_eq!(dataset.schema.version, 1);
    assert_eq!(dataset.schema.layout.mode, DataMode::Ascii);
    let description = dataset.schema.description.as_ref().unwrap();
    assert_eq!(description.text.as_deref(), Some("Storage ring status"));

    assert_eq!(dataset.pages.len(), 2);
    assert_eq!(dataset.total_rows(), 5);
    assert_eq!(
        dataset.parameter("Shift"),
        Some(&Value::String("day shift".to_string()))
    );
    assert_eq!(dataset.parameter("FillNumber"), Some(&Value::Long(1021)));
    assert_eq!(dataset.parameter("RingMode"), Some(&Value::Character('T')));

    let current = &dataset.columns()[1];
    assert_eq!(current.units.as_deref(), Some("mA"));
    assert_eq!(current.symbol.as_deref(), Some("I"));
    assert_eq!(current.format_string.as_deref(), Some("%8.3f"));

    let second = &dataset.pages[1];
    assert_eq!(
        second.parameters,
        vec![
            Value::String("night shift".to_string()),
            Value::Long(1022),
            Value::Character('T'),
        ]
    );
    assert_eq!(
        second.row(1),
        Some(vec![
            Value::Double(60.0),
            Value::Float(101.0),
            Value::String("top up".to_string()),
        ])
    );
    for page in &dataset.pages {
        assert!(page.columns.iter().all(|c| c.len() == page.row_count));
    }
}

#[test]
fn test_column_pages_across_file() {
    let dataset = load_dataset(TEST_FILE).unwrap();

    let current = dataset.column_pages("Current").unwrap();
    assert_eq!(current.len(), 2);
    assert_eq!(current[0], &ColumnData::Float(vec![101.25, 100.75, 100.5]));
    assert_eq!(current[1].to_f64_vec(), Some(vec![99.5, 101.0]));

    assert!(matches!(
        dataset.column_pages("Voltage"),
        Err(DecodeError::UnknownColumn(name)) if name == "Voltage"
    ));
}

#[test]
fn test_decode_file_with_config() {
    let decoder = SddsDecoder::with_config(
        DecoderConfig::new()
            .with_columns(["Status", "Time"])
            .with_max_pages(1),
    );
    let dataset = decoder.decode_file(TEST_FILE).unwrap();

    let names: Vec<&str> = dataset.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Time", "Status"]);
    assert_eq!(dataset.pages.len(), 1);
    assert_eq!(dataset.pages[0].columns.len(), 2);
    assert_eq!(
        dataset.pages[0].columns[0],
        ColumnData::Double(vec![0.0, 60.0, 120.0])
    );
}

#[test]
fn test_missing_file_is_io_error() {
    let temp = TempDir::new().unwrap();
    let result = load_dataset(temp.path().join("missing.sdds"));
    assert!(matches!(result, Err(DecodeError::Io(_))));
}

#[test]
fn test_ascii_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("orbit.sdds");
    let dataset = orbit_dataset();

    write_sdds(&path, &dataset, DataMode::Ascii).unwrap();
    let decoded = load_dataset(&path).unwrap();

    assert_eq!(decoded.schema.layout.mode, DataMode::Ascii);
    assert_same_data(&decoded, &dataset);
}

#[test]
fn test_binary_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("orbit_binary.sdds");
    let dataset = orbit_dataset();

    write_sdds(&path, &dataset, DataMode::Binary).unwrap();
    let decoded = load_dataset(&path).unwrap();

    assert_eq!(decoded.schema.layout.mode, DataMode::Binary);
    assert_same_data(&decoded, &dataset);
}

#[test]
fn test_big_endian_column_major_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("orbit_be.sdds");
    let mut dataset = orbit_dataset();
    dataset.schema.layout.column_major = true;

    let file = std::fs::File::create(&path).unwrap();
    let mut writer = SddsWriter::new(file, DataMode::Binary).with_endianness(Endianness::Big);
    writer.write_dataset(&dataset).unwrap();
    writer.flush().unwrap();
    drop(writer);

    let decoded = load_dataset(&path).unwrap();
    assert_eq!(decoded.schema.layout.endianness, Endianness::Big);
    assert!(decoded.schema.layout.column_major);
    assert_same_data(&decoded, &dataset);
}

#[test]
fn test_sample_file_reencodes_to_binary() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ring_status_binary.sdds");
    let dataset = load_dataset(TEST_FILE).unwrap();

    write_sdds(&path, &dataset, DataMode::Binary).unwrap();
    let decoded = load_dataset(&path).unwrap();

    assert_same_data(&decoded, &dataset);
}

#[test]
fn test_csv_export() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ring_status.csv");
    let dataset = load_dataset(TEST_FILE).unwrap();

    write_csv(&path, &dataset, 1).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "Time,Current,Status");
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], "0,99.5,injecting");
    assert_eq!(lines[2], "60,101,top up");
}

#[test]
fn test_csv_export_page_out_of_range() {
    let temp = TempDir::new().unwrap();
    let dataset = load_dataset(TEST_FILE).unwrap();

    let result = write_csv(temp.path().join("none.csv"), &dataset, 5);
    assert!(result.is_err());
    assert!(!temp.path().join("none.csv").exists());
}

#[test]
fn test_truncated_binary_file_is_schema_mismatch() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("truncated.sdds");
    write_sdds(&path, &orbit_dataset(), DataMode::Binary).unwrap();

    // The empty second page is 13 bytes; cut 11 more from the last row of the first
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() - 13 - 11);
    let truncated = path.with_extension("cut");
    std::fs::write(&truncated, &bytes).unwrap();

    let result = load_dataset(&truncated);
    assert!(
        matches!(result, Err(DecodeError::SchemaMismatch { page: 1, .. })),
        "unexpected result: {:?}",
        result
    );
}
