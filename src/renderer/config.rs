use std::path::PathBuf;

/// Contains configuration options for the renderer like the window size,
/// shader locations, and validation-layer toggle
pub struct RenderConfig {
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    pub vertex_shader_path: PathBuf,
    pub fragment_shader_path: PathBuf,
    pub enable_validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            window_title: "trigon".to_string(),
            window_width: 800,
            window_height: 600,
            vertex_shader_path: PathBuf::from("shaders/triangle.vert.spv"),
            fragment_shader_path: PathBuf::from("shaders/triangle.frag.spv"),
            enable_validation: cfg!(debug_assertions),
        }
    }
}
