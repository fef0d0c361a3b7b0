// Copyright 2026 the framelink authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An asynchronous framed TCP server/client framework.
//!
//! Applications implement [`Connection`] for per-connection behavior and
//! [`ServerHandler`] as the connection factory, then run a [`ServerEngine`];
//! the outbound side implements [`ClientHandler`] and runs a
//! [`ClientEngine`]. Messages travel as length-prefixed frames and are
//! decoded through [`PacketStream`].

pub mod network;
pub mod packet;
pub mod pool;
pub mod service;

pub use network::{
    drain_frames, AssemblyCursor, ClientHandler, Connection, ConnectionId, LengthPrefixProcessor,
    PacketProcessor, SendHandle, ServerHandler, DEFAULT_HEADER_SIZE,
};
pub use packet::{PacketStream, Wire, LENGTH_HEADER_SIZE};
pub use pool::{ArenaSlice, BufferArena, OpKind, OpPool, OpRecord};
pub use service::{
    setup_file_tracing, setup_tracing, setup_tracing_with, AppError, AppResult, ClientEngine,
    EngineConfig, EngineState, EngineStats, ServerEngine, Shutdown,
};
