// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of blogtable.
//
// blogtable is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// blogtable is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with blogtable.  If not,
// see <http://www.gnu.org/licenses/>.

//! Page views & visitors.

use std::{net::IpAddr, sync::Arc};

use blogtable::{blog::Error, entities::Slug};
use libtest_mimic::Failed;

use crate::Helper;

pub async fn page_views(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let about = Slug::new("analytics-about")?;
    let contact = Slug::new("analytics-contact")?;
    assert!(matches!(
        blog.record_page_view(&about).await,
        Err(Error::DoesNotExist { .. })
    ));

    let page = blog.add_page(&about, "About").await?;
    assert_eq!(page.number_views(), 0);
    assert!(matches!(
        blog.add_page(&about, "About").await,
        Err(Error::AlreadyExists { .. })
    ));
    blog.add_page(&contact, "Contact").await?;

    let week = blog.record_page_view(&about).await?;
    let again = blog.record_page_view(&about).await?;
    let contact_week = blog.record_page_view(&contact).await?;
    assert_eq!(blog.get_page(&about).await?.number_views(), 2);
    assert_eq!(blog.get_page(&contact).await?.number_views(), 1);

    // Unless the test straddled midnight on a Sunday, all three views fell in the same week
    if week == again && week == contact_week {
        assert_eq!(blog.get_page_week(&about, &week).await?.number_views(), 2);
        let weekly = blog
            .pages_for_week(&week)
            .await?
            .into_iter()
            .filter(|pw| pw.slug().starts_with("analytics-"))
            .map(|pw| (pw.slug().to_string(), pw.number_views()))
            .collect::<Vec<(String, u64)>>();
        assert_eq!(
            weekly,
            vec![
                ("analytics-about".to_owned(), 2),
                ("analytics-contact".to_owned(), 1)
            ]
        );
    }
    Ok(())
}

pub async fn visitors(helper: Arc<dyn Helper>) -> Result<(), Failed> {
    let blog = helper.blog();
    let ip: IpAddr = "198.51.100.7".parse()?;
    assert!(matches!(
        blog.get_visitor(&ip).await,
        Err(Error::DoesNotExist { .. })
    ));

    let first = blog.record_visit(ip).await?;
    assert_eq!(first.ip(), &ip);
    assert_eq!(first.number_sessions(), 1);
    assert_eq!(first.first_visit(), first.last_visit());

    let second = blog.record_visit(ip).await?;
    // Well within the session timeout
    assert_eq!(second.number_sessions(), 1);
    assert_eq!(second.first_visit(), first.first_visit());
    assert!(second.last_visit() > first.last_visit());
    assert_eq!(blog.get_visitor(&ip).await?, second);
    Ok(())
}
