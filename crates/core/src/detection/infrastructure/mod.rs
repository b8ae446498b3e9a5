pub mod model_resolver;
pub mod onnx_face_analyzer;
pub mod onnx_session;
