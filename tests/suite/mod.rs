mod commands;
mod lifecycle;
mod session;
