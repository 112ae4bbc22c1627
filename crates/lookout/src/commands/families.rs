//! Family command handlers.
//!
//! Role checks run against a fresh read of the family before each
//! mutating call; nothing enforces them server-side.

use tabled::Tabled;

use lookout_core::{Device, Family, LeaveOutcome, Role, Session};

use crate::cli::{FamiliesArgs, FamiliesCommand, GlobalOpts, RoleArg};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct FamilyRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Your Role")]
    role: String,
    #[tabled(rename = "Members")]
    members: usize,
    #[tabled(rename = "Devices")]
    devices: usize,
}

#[derive(Tabled)]
struct SharedDeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Owner")]
    owner: String,
}

fn family_row(family: &Family, me: &str) -> FamilyRow {
    FamilyRow {
        id: family.id.clone(),
        name: family.name.clone(),
        role: family
            .role_of(me)
            .map_or_else(|| "-".into(), |r| r.to_string()),
        members: family.roles.len(),
        devices: family.devices.len(),
    }
}

fn detail(family: &Family) -> String {
    let mut lines = vec![
        format!("ID:           {}", family.id),
        format!("Name:         {}", family.name),
    ];
    if !family.description.is_empty() {
        lines.push(format!("Description:  {}", family.description));
    }
    lines.push(format!("Created:      {}", util::fmt_time(family.created_at)));
    lines.push(format!("Devices:      {}", family.devices.len()));
    lines.push("Members:".into());
    for member in family.members() {
        lines.push(format!("  {:<8} {}", member.role, member.user_id));
    }
    lines.join("\n")
}

fn role_from_arg(arg: RoleArg) -> Role {
    match arg {
        RoleArg::Guest => Role::Guest,
        RoleArg::Member => Role::Member,
    }
}

async fn require_family(session: &Session, family_id: &str) -> Result<Family, CliError> {
    session
        .families()
        .fetch_family(family_id)
        .await?
        .ok_or_else(|| CliError::NotFound {
            resource_type: "Family".into(),
            identifier: family_id.into(),
            list_command: "families list".into(),
        })
}

async fn require_role(
    session: &Session,
    family_id: &str,
    required: Role,
    action: &str,
) -> Result<(), CliError> {
    session
        .families()
        .require_role(family_id, session.user_id(), required, action)
        .await?;
    Ok(())
}

// ── Handler ──────────────────────────────────────────────────────────

#[allow(clippy::too_many_lines)]
pub async fn handle(
    session: &Session,
    args: FamiliesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let me = session.user_id();
    match args.command {
        FamiliesCommand::List => {
            let families = session.families().list_user_families(me).await?;
            let out = output::render_list(
                &global.output,
                &families,
                |f| family_row(f, me),
                |f| f.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        FamiliesCommand::Get { family } => {
            let family = require_family(session, &family).await?;
            let out = output::render_single(&global.output, &family, detail, |f| f.id.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        FamiliesCommand::Create { name, description } => {
            let family = session
                .families()
                .create_family(&name, me, description.as_deref())
                .await?;
            output::notice("Family created", global.quiet);
            let out = output::render_single(&global.output, &family, detail, |f| f.id.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        FamiliesCommand::Delete { family } => {
            require_role(session, &family, Role::Owner, "Deleting a family").await?;
            if !util::confirm(
                &format!("Delete family '{family}'? Members lose access to shared devices."),
                global.yes,
            )? {
                return Ok(());
            }
            session.families().delete_family(&family).await?;
            output::notice("Family deleted", global.quiet);
            Ok(())
        }

        FamiliesCommand::Invite { family } => {
            require_role(session, &family, Role::Member, "Inviting guests").await?;
            let invite = session.create_invite(&family).await?;
            output::notice(
                &format!(
                    "Invite valid until {}",
                    util::fmt_time(invite.expires_at)
                ),
                global.quiet,
            );
            let out = output::render_single(
                &global.output,
                &invite,
                |i| i.code.clone(),
                |i| i.code.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        FamiliesCommand::Join { code } => {
            let redemption = session.families().redeem_invite(code.trim(), me).await?;
            output::notice(
                &format!(
                    "Joined family {} as {}",
                    redemption.family_id, redemption.role
                ),
                global.quiet,
            );
            Ok(())
        }

        FamiliesCommand::Leave { family } => {
            let existing = require_family(session, &family).await?;
            if existing.role_of(me) == Some(Role::Owner)
                && !util::confirm(
                    &format!(
                        "You own '{}'. Leaving deletes the family for everyone. Continue?",
                        existing.name
                    ),
                    global.yes,
                )?
            {
                return Ok(());
            }
            let message = match session.families().leave_family(&family, me).await? {
                LeaveOutcome::Left => "Left family",
                LeaveOutcome::FamilyDeleted => "Family deleted",
                LeaveOutcome::NotAMember => "You are not a member of this family",
            };
            output::notice(message, global.quiet);
            Ok(())
        }

        FamiliesCommand::Role { family, user, role } => {
            require_role(session, &family, Role::Owner, "Changing roles").await?;
            let role = role_from_arg(role);
            session
                .families()
                .update_member_role(&family, &user, role)
                .await?;
            output::notice(&format!("{user} is now {role}"), global.quiet);
            Ok(())
        }

        FamiliesCommand::Kick { family, user } => {
            require_role(session, &family, Role::Owner, "Removing members").await?;
            if user == me {
                return Err(CliError::Validation {
                    field: "user".into(),
                    reason: "use `families leave` to remove yourself".into(),
                });
            }
            if !util::confirm(&format!("Remove {user} from the family?"), global.yes)? {
                return Ok(());
            }
            session
                .families()
                .remove_user_from_family(&family, &user)
                .await?;
            output::notice("Member removed", global.quiet);
            Ok(())
        }

        FamiliesCommand::Transfer { family, user } => {
            require_role(session, &family, Role::Owner, "Transferring ownership").await?;
            if !util::confirm(
                &format!("Make {user} the owner? You become a member."),
                global.yes,
            )? {
                return Ok(());
            }
            session
                .families()
                .transfer_ownership(&family, &user, me)
                .await?;
            output::notice("Ownership transferred", global.quiet);
            Ok(())
        }

        FamiliesCommand::Share { family, device } => {
            require_role(session, &family, Role::Member, "Sharing devices").await?;
            session
                .families()
                .add_device_to_family(&family, &device)
                .await?;
            output::notice("Device shared", global.quiet);
            Ok(())
        }

        FamiliesCommand::Unshare { family, device } => {
            require_role(session, &family, Role::Member, "Unsharing devices").await?;
            session
                .families()
                .remove_device_from_family(&family, &device)
                .await?;
            output::notice("Device no longer shared", global.quiet);
            Ok(())
        }

        FamiliesCommand::Devices { family } => {
            require_family(session, &family).await?;
            let devices = session
                .families()
                .subscribe_family_devices(&family)
                .await?
                .latest();
            let color = output::should_color(&global.color);
            let out = output::render_list(
                &global.output,
                devices.as_slice(),
                |d: &Device| SharedDeviceRow {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    status: output::status_label(d.status, color),
                    owner: d.owner_id.clone().unwrap_or_else(|| "-".into()),
                },
                |d| d.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
