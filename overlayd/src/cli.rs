//  Copyright (C) 2017-2019  The AXIOM TEAM Association.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Command line options for the `overlayd` daemon.

use log::Level;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "overlayd", setting(structopt::clap::AppSettings::ColoredHelp))]
/// Local module manager daemon
pub struct OverlaydCliOpt {
    /// Overlayd subcommand
    #[structopt(subcommand)]
    pub cmd: OverlaydSubCommand,
    /// Path to the profile directory (defaults to the platform config dir)
    #[structopt(long = "profiles-path", parse(from_os_str))]
    pub profiles_path: Option<PathBuf>,
    /// Set log level. (Defaults to INFO).
    /// Available levels: [ERROR, WARN, INFO, DEBUG, TRACE]
    #[structopt(short = "l", long = "logs", next_line_help = true)]
    pub logs_level: Option<Level>,
    /// Set a custom user profile name
    #[structopt(short = "p", long = "profile-name")]
    pub profile_name: Option<String>,
}

#[derive(StructOpt, Debug)]
/// Overlayd subcommand
pub enum OverlaydSubCommand {
    /// Start the daemon and run its supervisor loop
    #[structopt(name = "start", setting(structopt::clap::AppSettings::ColoredHelp))]
    Start(StartOpt),
    /// Print the resolved module catalogue
    #[structopt(name = "list-modules", setting(structopt::clap::AppSettings::ColoredHelp))]
    ListModules(ListModulesOpt),
    /// Load and validate configuration without starting the daemon
    #[structopt(name = "check-conf", setting(structopt::clap::AppSettings::ColoredHelp))]
    CheckConf(CheckConfOpt),
}

#[derive(StructOpt, Debug)]
/// `start` subcommand options
pub struct StartOpt {}

#[derive(StructOpt, Debug)]
/// `list-modules` subcommand options
pub struct ListModulesOpt {}

#[derive(StructOpt, Debug)]
/// `check-conf` subcommand options
pub struct CheckConfOpt {}
