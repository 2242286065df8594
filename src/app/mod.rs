use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitCode, Stdio};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

include!("types.rs");
include!("normalize.rs");
include!("extract.rs");
include!("dataset.rs");
include!("webdriver.rs");
include!("crawl.rs");
include!("runtime.rs");
