pub mod frame_counter;
pub mod per_frame_data;
pub mod pipeline_settings;
pub mod scene;
