pub mod sqlite_face_store;
