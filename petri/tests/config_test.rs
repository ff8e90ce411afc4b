use clap::Parser;
use petri::config::{CountCommand, CountConfig, GlobalArgs, ParamArgs, TrackCommand, TrackConfig};
use petri::params::{ColonyPolarity, PipelineParams, SegmentationMode};
use tempfile::TempDir;

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: TestCommand,
}

#[derive(clap::Subcommand)]
enum TestCommand {
    Track(TrackCommand),
    Count(CountCommand),
}

fn parse(args: &[&str]) -> TestCli {
    TestCli::try_parse_from(std::iter::once("petri").chain(args.iter().copied())).unwrap()
}

#[test]
fn test_track_config_from_cli() {
    let cli = parse(&[
        "track",
        "runs/a",
        "runs/b",
        "--n-dishes",
        "2",
        "--stack-depth",
        "3",
        "--mode",
        "separate",
        "--min-distance",
        "7.5",
        "--permissive",
        "--output-dir",
        "/tmp/out",
    ]);
    let TestCommand::Track(cmd) = cli.command else {
        panic!("expected track");
    };

    let config = TrackConfig::from_args(cli.global, cmd).unwrap();
    assert_eq!(config.base.sources, vec!["runs/a", "runs/b"]);
    assert!(!config.base.strict);
    assert_eq!(config.base.output_dir.as_deref(), Some("/tmp/out"));
    assert_eq!(config.params.n_dishes, 2);
    assert_eq!(config.params.stack_depth, 3);
    assert_eq!(config.params.segmentation.mode, SegmentationMode::Separate);
    assert_eq!(config.params.separator.min_distance, 7.5);
}

#[test]
fn test_count_config_with_params_file_and_override() {
    let temp_dir = TempDir::new().unwrap();
    let params_path = temp_dir.path().join("lab.toml");
    std::fs::write(
        &params_path,
        r#"
n_dishes = 4

[detector]
min_radius = 300
max_radius = 700

[segmentation]
polarity = "bright"
bias = 6.0
"#,
    )
    .unwrap();

    let params_arg = params_path.to_string_lossy().to_string();
    let cli = parse(&["count", "plate.png", "--params", &params_arg, "--bias", "-2.5"]);
    let TestCommand::Count(cmd) = cli.command else {
        panic!("expected count");
    };

    let config = CountConfig::from_args(cli.global, cmd).unwrap();
    assert!(config.base.strict);
    assert_eq!(config.params.n_dishes, 4);
    assert_eq!(config.params.detector.min_radius, 300);
    assert_eq!(config.params.detector.max_radius, 700);
    assert_eq!(config.params.segmentation.polarity, ColonyPolarity::Bright);
    assert_eq!(config.params.segmentation.bias, -2.5);
    assert_eq!(
        config.params.foreground,
        PipelineParams::default().foreground
    );
}

#[test]
fn test_invalid_block_size_is_rejected_by_parser() {
    let result = TestCli::try_parse_from(["petri", "track", "run", "--block-size", "64"]);
    assert!(result.is_err());
}

#[test]
fn test_badly_typed_params_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let bad = temp_dir.path().join("bad.toml");
    std::fs::write(&bad, "[segmentation]\nblock_size = \"large\"\n").unwrap();

    let args = ParamArgs {
        params_file: Some(bad.to_string_lossy().to_string()),
        ..Default::default()
    };
    assert!(args.resolve().is_err());
}

#[test]
fn test_params_round_trip_through_toml() {
    let mut params = PipelineParams::default();
    params.segmentation.mode = SegmentationMode::Separate;
    params.detector.min_center_distance = 450.0;

    let text = toml::to_string_pretty(&params).unwrap();
    assert!(text.contains("mode = \"separate\""));
    let parsed: PipelineParams = toml::from_str(&text).unwrap();
    assert_eq!(parsed, params);
}
