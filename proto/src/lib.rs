//! gRPC protocol for the audio-scribe daemon.

tonic::include_proto!("scribe");
