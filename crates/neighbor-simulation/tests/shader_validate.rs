//! Validates the compute shader module without needing a GPU.

#[test]
fn wgsl_module_parses_and_validates() {
    let source = include_str!("../src/shaders/neighbor.wgsl");

    let module = naga::front::wgsl::parse_str(source).expect("WGSL should parse");

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).expect("WGSL should validate");

    // Every pipeline stage must be present as an entry point.
    let entry_points: Vec<&str> = module
        .entry_points
        .iter()
        .map(|ep| ep.name.as_str())
        .collect();
    for expected in [
        "assign_cells",
        "sort_step",
        "reset_ranges",
        "build_ranges",
        "rearrange",
        "search_neighbors",
        "integrate",
    ] {
        assert!(
            entry_points.contains(&expected),
            "missing entry point {expected}, found {entry_points:?}"
        );
    }
}
