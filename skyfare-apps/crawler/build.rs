fn main() {
    println!("cargo:rerun-if-changed=src/proto/google_flights.proto");

    prost_build::compile_protos(&["src/proto/google_flights.proto"], &["."]).unwrap();
}
