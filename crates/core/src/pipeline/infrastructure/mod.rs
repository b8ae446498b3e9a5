pub mod pipeline_controller;
