use clap::{Arg, Command};

#[must_use]
pub fn command() -> Command {
    Command::new("device")
        .about("Manage device provisioning")
        .subcommand_required(true)
        .subcommand(
            Command::new("list")
                .about("List devices by status")
                .arg(
                    Arg::new("status")
                        .help("Device status to list")
                        .default_value("pending")
                        .value_parser(["pending", "approved", "rejected"]),
                ),
        )
        .subcommand(
            Command::new("approve")
                .about("Approve a pending device for a specific entryway")
                .arg(Arg::new("device_id").required(true))
                .arg(
                    Arg::new("entry_id")
                        .required(true)
                        .value_parser(clap::value_parser!(i64)),
                ),
        )
        .subcommand(
            Command::new("reject")
                .about("Reject a device")
                .arg(Arg::new("device_id").required(true)),
        )
        .subcommand(
            Command::new("revoke")
                .about("Revoke a device's approval for an entryway")
                .arg(Arg::new("device_id").required(true))
                .arg(
                    Arg::new("entry_id")
                        .required(true)
                        .value_parser(clap::value_parser!(i64)),
                ),
        )
        .subcommand(
            Command::new("prune")
                .about("Delete old devices of a given status")
                .arg(
                    Arg::new("older-than-days")
                        .long("older-than-days")
                        .help("Only devices created more than this many days ago")
                        .default_value("30")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    Arg::new("status")
                        .long("status")
                        .default_value("pending")
                        .value_parser(["pending", "approved", "rejected"]),
                ),
        )
}
