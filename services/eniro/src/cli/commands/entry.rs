use clap::{Arg, Command};

#[must_use]
pub fn command() -> Command {
    Command::new("entry")
        .about("Manage entryways")
        .subcommand_required(true)
        .subcommand(Command::new("list").about("List entryways"))
        .subcommand(
            Command::new("add")
                .about("Add an entryway")
                .arg(Arg::new("name").required(true))
                .arg(
                    Arg::new("calendar-url")
                        .long("calendar-url")
                        .help("Optional reservation calendar URL"),
                ),
        )
        .subcommand(
            Command::new("delete")
                .about("Soft-delete an entryway")
                .arg(
                    Arg::new("id")
                        .required(true)
                        .value_parser(clap::value_parser!(i64)),
                ),
        )
}
