//! Face indexing: sample a video, detect and embed faces, cluster them into
//! people and persist the result.

pub mod shared {
    pub mod bounding_box;
    pub mod constants;
    pub mod frame;
    pub mod math;
    pub mod roi;
    pub mod video_metadata;
}

pub mod video {
    pub mod domain {
        pub mod image_writer;
        pub mod video_reader;
    }
    pub mod infrastructure {
        pub mod ffmpeg_reader;
        pub mod image_file_writer;
    }
}

pub mod detection {
    pub mod domain {
        pub mod detection;
        pub mod face_collector;
        pub mod face_detector;
    }
    pub mod infrastructure;
}

pub mod clustering {
    pub mod domain {
        pub mod cluster_engine;
    }
    pub mod infrastructure;
}

pub mod persistence {
    pub mod domain {
        pub mod face_store;
        pub mod records;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod error;
    pub mod face_persister;
    pub mod frame_sampler;
    pub mod index_faces_use_case;
    pub mod pipeline_logger;
    pub mod progress;
    pub mod infrastructure;
}

pub mod config {
    pub mod settings;
}
