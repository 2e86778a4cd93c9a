/*!
# Waterdesk

Internal reporting and ordering portal for a water-distribution business.

## Overview

The system of record is a Google spreadsheet maintained by the owner; this
application never writes to it. It authenticates two classes of users (one
fixed manager account and self-registering customers), gates every route by
role, and renders pages from fresh reads of four worksheets.

## Architecture

- **Access control**: server-side cookie sessions plus an explicit gate
  function every handler runs before its body. Two layers compose: a
  login requirement and, where declared, a role requirement.
- **Record source**: a lazily initialized read-only Google Sheets client,
  latched as permanently unavailable if startup credentials fail. Each
  page fetch reads the worksheets fresh; nothing is cached.
- **Aggregation**: a pure function folding the four tables into dashboard
  metrics, with a fail-soft integer policy for malformed cells and a
  single all-or-nothing error state per page.
- **Views**: handlebars templates under `templates/`, with a `currency`
  helper for thousands separators.

## Modules

- **auth**: roles, sessions, the identity registry, login/register/logout,
  and the access-control gate
- **records**: credential loading, the shared sheets client, record zipping,
  and the fail-soft field readers
- **dashboard**: the aggregation engine and its context type
- **app**: routing, handlers, flash messages, and server startup
*/

pub mod app;
pub mod auth;
pub mod dashboard;
pub mod records;
