fn main() {
    println!("cargo:rerun-if-changed=./jobrunner.proto");
    tonic_build::compile_protos("./jobrunner.proto")
        .unwrap_or_else(|err| panic!("Failed to compile protos {:?}", err));
}
