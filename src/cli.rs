use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP service.
    Serve {
        /// Address to listen on, overrides server.listen_addr
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Analyze a ZIP of invoice PDFs against a policy PDF and store the results
    Analyze {
        /// HR reimbursement policy (PDF)
        #[clap(short, long)]
        policy: PathBuf,

        /// Archive of invoice PDFs
        #[clap(short, long)]
        invoices: PathBuf,

        /// Employee the invoices belong to
        #[clap(short, long)]
        employee: String,
    },

    /// Similarity search over stored analyses
    Search {
        query: String,

        /// Max number of results
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Status filter (substring, case-insensitive)
        #[clap(short, long)]
        status: Option<String>,

        /// Employee name filter (substring, case-insensitive)
        #[clap(short, long)]
        employee: Option<String>,

        /// Analysis date filter, e.g. 2024-05-01
        #[clap(short, long)]
        date: Option<String>,

        /// Print the count
        #[clap(short = 'c', long, default_value = "false")]
        count: bool,
    },

    /// Ask a question about stored analyses
    Ask { question: String },

    /// Show the filters a query would be searched with
    Filters { query: String },

    /// Print every stored record
    List {},
}
