use std::path::PathBuf;


fn data_output_path() -> PathBuf {
    PathBuf::from("data/integration_tests/")
}
