mod protocol_parser;
mod shared_surface;
