pub const MOTIFMAP_DISPLAY_VERSION: &str = env!("MOTIFMAP_DISPLAY_VERSION");
pub const MOTIFMAP_BUILD_N: &str = env!("MOTIFMAP_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "motifmap {}\nBuild {}\nEntity maps and track aggregation for sequence workbenches",
        MOTIFMAP_DISPLAY_VERSION, MOTIFMAP_BUILD_N
    )
}
