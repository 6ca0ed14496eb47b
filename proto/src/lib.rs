tonic::include_proto!("jobrunner");
