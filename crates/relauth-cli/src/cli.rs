use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use relauth_core::engine::LookupCursor;
use relauth_core::tuple::{ObjectRef, SubjectRef};

#[derive(Debug, Parser)]
#[command(name = "relauth", version, about = "Evaluate relationship-based permissions")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct Sources {
    /// Schema file.
    #[arg(long)]
    pub schema: PathBuf,

    /// Tuple file, one tuple per line.
    #[arg(long)]
    pub tuples: Option<PathBuf>,

    /// Evaluate at this snapshot instead of the latest.
    #[arg(long)]
    pub snapshot: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct Paging {
    /// Resume after a cursor printed by a previous page.
    #[arg(long)]
    pub cursor: Option<LookupCursor>,

    #[arg(long)]
    pub page_size: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse, validate and compile a schema.
    Validate {
        #[arg(long)]
        schema: PathBuf,
    },
    /// Decide whether a subject holds a permission on an object.
    Check {
        #[command(flatten)]
        sources: Sources,
        object: ObjectRef,
        permission: String,
        subject: SubjectRef,
    },
    /// Print the subject tree granting a permission.
    Expand {
        #[command(flatten)]
        sources: Sources,
        object: ObjectRef,
        permission: String,
    },
    /// List objects of a type on which a subject holds a permission.
    LookupResources {
        #[command(flatten)]
        sources: Sources,
        #[command(flatten)]
        paging: Paging,
        resource_type: String,
        permission: String,
        subject: SubjectRef,
    },
    /// List subjects of a type (or `type#relation`) holding a permission.
    LookupSubjects {
        #[command(flatten)]
        sources: Sources,
        #[command(flatten)]
        paging: Paging,
        object: ObjectRef,
        permission: String,
        subject_type: String,
    },
}
