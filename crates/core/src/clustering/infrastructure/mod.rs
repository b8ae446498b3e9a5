pub mod dbscan_cluster_engine;
