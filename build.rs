//! Build script for cni-dedup
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! reported by `cni-dedup --version`.

fn main() {
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
