//! API module for HTTP and WebSocket endpoints
//!
//! REST endpoints for markers, GPS samples and users, plus the WebSocket
//! endpoint that carries presence and live locations.

pub mod http;
pub mod rest;
pub mod websocket;
