//! Names of the programs the built-in stages resolve at start.
//!
//! A backend must provide every program a configured pipeline uses; a missing
//! one fails the stage's start.

pub const SCREEN_QUAD: &str = "screen-quad";
pub const SHADOW_DEPTH: &str = "shadow-depth";
pub const GBUFFER: &str = "gbuffer";
pub const SSAO: &str = "ssao";
pub const PBR_LIGHTS: &str = "pbr-lights";
pub const BACKGROUND: &str = "background";
pub const TONEMAP: &str = "tonemap";
pub const EMISSIVE: &str = "emissive";
pub const UNLIT: &str = "unlit";
pub const CUSTOM: &str = "custom";
pub const OIT_ACCUM: &str = "oit-accum";
pub const OIT_REVEAL: &str = "oit-reveal";
pub const OIT_COMPOSITE: &str = "oit-composite";

pub const ALL: [&str; 13] = [
    SCREEN_QUAD,
    SHADOW_DEPTH,
    GBUFFER,
    SSAO,
    PBR_LIGHTS,
    BACKGROUND,
    TONEMAP,
    EMISSIVE,
    UNLIT,
    CUSTOM,
    OIT_ACCUM,
    OIT_REVEAL,
    OIT_COMPOSITE,
];

/// Programs drawn as a full-screen pass rather than per mesh.
pub fn is_fullscreen(name: &str) -> bool {
    matches!(
        name,
        SCREEN_QUAD | SSAO | PBR_LIGHTS | BACKGROUND | TONEMAP | EMISSIVE | OIT_COMPOSITE
    )
}
